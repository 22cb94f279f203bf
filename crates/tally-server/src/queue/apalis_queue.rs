//! Durable job queue on apalis with Postgres storage

use apalis::prelude::*;
use apalis_postgres::PostgresStorage;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use tally_common::types::UploadJob;
use tokio::sync::Semaphore;
use tracing::{info, instrument};

use super::{JobHandler, JobQueue};
use crate::error::{IngestError, IngestResult};

/// Shared with every apalis task through `Data`
#[derive(Clone)]
struct WorkerContext {
    handler: Arc<dyn JobHandler>,
    slots: Arc<Semaphore>,
}

/// Jobs persisted in the `apalis` schema of the durable store
///
/// A job whose handler returns an error stays with apalis, which retries it
/// according to its own policy.
#[derive(Clone)]
pub struct ApalisQueue {
    storage: PostgresStorage<UploadJob>,
}

impl ApalisQueue {
    /// Prepare the apalis schema and bind storage to `pool`
    pub async fn setup(pool: &PgPool) -> IngestResult<Self> {
        info!("Setting up PostgreSQL storage for apalis");
        PostgresStorage::setup(pool)
            .await
            .map_err(|e| IngestError::Queue(format!("Failed to set up job storage: {}", e)))?;

        Ok(Self {
            storage: PostgresStorage::new(pool),
        })
    }
}

async fn run_upload_job(job: UploadJob, ctx: Data<WorkerContext>) -> IngestResult<()> {
    let _slot = ctx
        .slots
        .acquire()
        .await
        .map_err(|_| IngestError::Internal("worker slots closed".to_string()))?;

    ctx.handler.handle(job).await
}

#[async_trait]
impl JobQueue for ApalisQueue {
    #[instrument(skip(self, job), fields(summary_id = %job.summary_id))]
    async fn enqueue(&self, job: UploadJob) -> IngestResult<()> {
        let mut storage = self.storage.clone();
        storage
            .push(job)
            .await
            .map_err(|e| IngestError::Queue(format!("Failed to enqueue job: {}", e)))?;
        Ok(())
    }

    async fn consume(
        &self,
        worker: &str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> IngestResult<()> {
        let storage = self.storage.clone();
        let name = worker.to_string();
        let context = WorkerContext {
            handler,
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
        };

        info!(worker = %name, concurrency, "Job worker started");

        Monitor::new()
            .register(move |_index| {
                WorkerBuilder::new(name.clone())
                    .backend(storage.clone())
                    .data(context.clone())
                    .build(run_upload_job)
            })
            .run()
            .await
            .map_err(|e| IngestError::Queue(format!("Job worker error: {:?}", e)))?;

        info!(worker = %worker, "Job worker stopped");
        Ok(())
    }
}
