//! Tally Server - Main entry point

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tally_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tracing::info;

use tally_server::{
    api,
    config::Config,
    ingest::{DefaultPolicy, IngestionPipeline},
    queue::{ApalisQueue, JobQueue, WorkerPool},
    service::ExpenseService,
    source::{ObjectSource, S3ObjectSource},
    store::{CacheStore, PgRecordStore, RecordStore, RedisCache},
};

#[tokio::main]
async fn main() -> Result<()> {
    let mut log_config = LogConfig::from_env()?.with_prefix("tally-server");
    if log_config.filter_directives.is_none() {
        log_config = log_config.with_filter("tally_server=debug,tower_http=debug,sqlx=warn");
    }
    let _log_guard = init_logging(&log_config)?;

    info!("Starting Tally Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    let cache: Arc<dyn CacheStore> = Arc::new(RedisCache::connect(&config.redis.url).await?);
    let records: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(db_pool.clone()));
    let source: Arc<dyn ObjectSource> = Arc::new(S3ObjectSource::new(config.storage.clone()));
    let queue: Arc<dyn JobQueue> = Arc::new(ApalisQueue::setup(&db_pool).await?);

    let workers = if config.ingest.worker_enabled {
        let pipeline = IngestionPipeline::new(
            source.clone(),
            cache.clone(),
            records.clone(),
            Arc::new(DefaultPolicy::from_settings(&config.ingest)),
            &config.ingest,
        );
        let handle =
            WorkerPool::from_settings(queue.clone(), Arc::new(pipeline), &config.ingest).start();
        info!(workers = handle.len(), "Ingestion workers started");
        Some(handle)
    } else {
        info!("Ingestion workers disabled (INGEST_WORKER_ENABLED=false)");
        None
    };

    let service = ExpenseService::new(source, cache, records, queue);
    api::serve(&config.server, service, shutdown_signal()).await?;

    if let Some(workers) = workers {
        workers.abort();
    }

    info!("Server shut down gracefully");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
