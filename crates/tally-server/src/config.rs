//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 3001;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/tally";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default Redis URL for local development.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Default number of attempts the S3 client makes per request.
pub const DEFAULT_S3_MAX_ATTEMPTS: u32 = 5;

/// Default number of worker units consuming the job queue.
pub const DEFAULT_WORKER_COUNT: usize = 1;

/// Default number of pipelines one worker unit runs at once.
pub const DEFAULT_MAX_CONCURRENT_PIPELINES: usize = 3;

/// Default ceiling on chunks in flight per pipeline.
pub const DEFAULT_MAX_PROCESSING_PER_STREAM: usize = 100;

/// Default number of records per chunk.
pub const DEFAULT_BATCH_SIZE: usize = 2000;

/// Default ranged-read window (2 MiB).
pub const DEFAULT_RANGE_WINDOW_BYTES: u64 = 2 * 1024 * 1024;

/// Default time cache-side progress keys survive after completion.
pub const DEFAULT_SUMMARY_RETENTION_SECS: u64 = 60;

/// Amount used by upstream systems as a placeholder for "unknown".
pub const DEFAULT_SENTINEL_AMOUNTS: &str = "1";

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub ingest: IngestSettings,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Durable store (Postgres) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Cache store (Redis) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Object source (S3) configuration
///
/// Region comes from each source URL; these settings apply to every client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub max_attempts: u32,
}

/// Pipeline and worker tunables
///
/// Peak memory is roughly `max_processing_per_stream * batch_size` records per
/// pipeline, times `max_concurrent_pipelines * worker_count` per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    pub worker_enabled: bool,
    pub worker_count: usize,
    pub max_concurrent_pipelines: usize,
    pub max_processing_per_stream: usize,
    pub batch_size: usize,
    pub range_window_bytes: u64,
    pub summary_retention_secs: u64,
    pub excluded_companies: HashSet<String>,
    pub sentinel_amounts: HashSet<String>,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            server: ServerConfig {
                host: std::env::var("TALLY_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
                port: env_parse("TALLY_PORT", DEFAULT_SERVER_PORT),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_parse(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_parse(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
            },
            redis: RedisConfig {
                url: std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string()),
            },
            storage: StorageConfig {
                endpoint: std::env::var("S3_ENDPOINT").ok(),
                access_key: std::env::var("S3_ACCESS_KEY").ok(),
                secret_key: std::env::var("S3_SECRET_KEY").ok(),
                path_style: env_parse("S3_PATH_STYLE", false),
                max_attempts: env_parse("S3_MAX_ATTEMPTS", DEFAULT_S3_MAX_ATTEMPTS),
            },
            ingest: IngestSettings::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.redis.url.is_empty() {
            anyhow::bail!("Redis URL cannot be empty");
        }

        if self.storage.access_key.is_some() != self.storage.secret_key.is_some() {
            anyhow::bail!("S3_ACCESS_KEY and S3_SECRET_KEY must be set together");
        }

        self.ingest.validate()
    }
}

impl IngestSettings {
    pub fn from_env() -> Self {
        Self {
            worker_enabled: env_parse("INGEST_WORKER_ENABLED", true),
            worker_count: env_parse("INGEST_WORKER_COUNT", DEFAULT_WORKER_COUNT),
            max_concurrent_pipelines: env_parse(
                "INGEST_MAX_CONCURRENT_PIPELINES",
                DEFAULT_MAX_CONCURRENT_PIPELINES,
            ),
            max_processing_per_stream: env_parse(
                "INGEST_MAX_PROCESSING_PER_STREAM",
                DEFAULT_MAX_PROCESSING_PER_STREAM,
            ),
            batch_size: env_parse("INGEST_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            range_window_bytes: env_parse("INGEST_RANGE_WINDOW_BYTES", DEFAULT_RANGE_WINDOW_BYTES),
            summary_retention_secs: env_parse(
                "INGEST_SUMMARY_RETENTION_SECS",
                DEFAULT_SUMMARY_RETENTION_SECS,
            ),
            excluded_companies: parse_list(
                &std::env::var("INGEST_EXCLUDED_COMPANIES").unwrap_or_default(),
            ),
            sentinel_amounts: parse_list(
                &std::env::var("INGEST_SENTINEL_AMOUNTS")
                    .unwrap_or_else(|_| DEFAULT_SENTINEL_AMOUNTS.to_string()),
            ),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_count == 0 {
            anyhow::bail!("INGEST_WORKER_COUNT must be greater than 0");
        }
        if self.max_concurrent_pipelines == 0 {
            anyhow::bail!("INGEST_MAX_CONCURRENT_PIPELINES must be greater than 0");
        }
        if self.max_processing_per_stream == 0 {
            anyhow::bail!("INGEST_MAX_PROCESSING_PER_STREAM must be greater than 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("INGEST_BATCH_SIZE must be greater than 0");
        }
        if self.range_window_bytes == 0 {
            anyhow::bail!("INGEST_RANGE_WINDOW_BYTES must be greater than 0");
        }
        Ok(())
    }

    pub fn summary_retention(&self) -> Duration {
        Duration::from_secs(self.summary_retention_secs)
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            worker_enabled: true,
            worker_count: DEFAULT_WORKER_COUNT,
            max_concurrent_pipelines: DEFAULT_MAX_CONCURRENT_PIPELINES,
            max_processing_per_stream: DEFAULT_MAX_PROCESSING_PER_STREAM,
            batch_size: DEFAULT_BATCH_SIZE,
            range_window_bytes: DEFAULT_RANGE_WINDOW_BYTES,
            summary_retention_secs: DEFAULT_SUMMARY_RETENTION_SECS,
            excluded_companies: HashSet::new(),
            sentinel_amounts: parse_list(DEFAULT_SENTINEL_AMOUNTS),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn parse_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
