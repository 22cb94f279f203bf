//! Tally Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streaming ingestion of expense CSV exports with a thin HTTP front end.
//!
//! # Overview
//!
//! - **Object source**: ranged reads from S3 in fixed windows
//! - **Pipeline**: decode, batch, gate, classify, then write each chunk to the
//!   durable store (Postgres) and the live cache (Redis) in parallel
//! - **Reconciliation**: rebuild reports from durable rows once a run drains
//! - **Jobs**: uploads are queued and run by a bounded worker pool
//! - **API**: submit uploads and poll summaries, reports and expenses
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tally_server::ingest::{DefaultPolicy, IngestionPipeline};
//! use tally_server::config::IngestSettings;
//! use tally_server::source::MemoryObjectSource;
//! use tally_server::store::{MemoryCache, MemoryRecordStore};
//! use tally_common::types::UploadJob;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = IngestSettings::default();
//! let pipeline = IngestionPipeline::new(
//!     Arc::new(MemoryObjectSource::new()),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(MemoryRecordStore::new()),
//!     Arc::new(DefaultPolicy::from_settings(&settings)),
//!     &settings,
//! );
//! let job = UploadJob::new("summary-1", "eu-west-1", "bucket", "export.csv");
//! let stats = pipeline.run(&job).await?;
//! println!("{} records in {} chunks", stats.records, stats.chunks);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod queue;
pub mod service;
pub mod source;
pub mod store;
mod sync;

pub use error::{ApiError, IngestError, IngestResult};
pub use service::ExpenseService;
