//! Expense ingestion pipeline
//!
//! # Architecture
//!
//! ```text
//! RangedObjectReader ──bytes──> decode_records ──records──> batch_records
//!                                                                │ chunks
//!                                                    BackpressureGate::admit
//!                                                                │
//!                                   classify_chunk ──> DualStoreAggregator (task per chunk)
//!                                                                │ drained
//!                                                        ReportReconciler
//! ```
//!
//! Memory per pipeline is bounded by the gate ceiling times the batch size,
//! plus one ranged-read window.

pub mod aggregate;
pub mod classify;
pub mod decode;
pub mod gate;
pub mod pipeline;
pub mod reconcile;

pub use aggregate::{ChunkOutcome, DualStoreAggregator};
pub use classify::{classify_chunk, ClassificationPolicy, DefaultPolicy};
pub use decode::{batch_records, decode_records, Chunk};
pub use gate::{BackpressureGate, ChunkPermit};
pub use pipeline::{IngestionPipeline, PipelineStats};
pub use reconcile::{Reconciliation, ReportReconciler};
