//! Cache and durable stores
//!
//! The cache store ([`CacheStore`]) owns live progress for a run: counters,
//! the report-key membership set and working report documents. The durable
//! store ([`RecordStore`]) owns the permanent record of truth for expenses,
//! finalized reports and completed summaries.
//!
//! Only the aggregator and the reconciler write through these traits; the
//! expense service reads.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;
use tally_common::types::{ExpenseRecord, ExpenseStatus, Report, ReportKey, UploadSummary};

use crate::error::IngestResult;

pub mod memory;
pub mod postgres;
pub mod redis_cache;

pub use memory::{MemoryCache, MemoryRecordStore};
pub use postgres::PgRecordStore;
pub use redis_cache::RedisCache;

/// What one chunk contributes to its summary
///
/// Every field is additive, so deltas commute and chunks may land in any
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub report_keys: BTreeSet<ReportKey>,
    pub completed: i64,
    pub excluded: i64,
    pub failed: i64,
}

impl ProgressDelta {
    /// Tally a classified chunk
    ///
    /// Report keys come from completed records only; records without a valid
    /// key are counted but contribute no key.
    pub fn from_chunk(records: &[ExpenseRecord]) -> Self {
        let mut delta = ProgressDelta::default();
        for record in records {
            match record.status {
                Some(ExpenseStatus::Completed) => {
                    delta.completed += 1;
                    if let Ok(key) = record.report_key() {
                        delta.report_keys.insert(key);
                    }
                }
                Some(ExpenseStatus::Excluded) => delta.excluded += 1,
                Some(ExpenseStatus::Failed) => delta.failed += 1,
                None => {}
            }
        }
        delta
    }

    /// Non-zero counter increments, by summary field name
    pub fn increments(&self) -> impl Iterator<Item = (&'static str, i64)> {
        [
            ("totalCompleted", self.completed),
            ("totalExcluded", self.excluded),
            ("totalFailed", self.failed),
        ]
        .into_iter()
        .filter(|(_, n)| *n != 0)
    }

    pub fn records(&self) -> i64 {
        self.completed + self.excluded + self.failed
    }
}

/// Fast mutable progress state shared by every pipeline
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the summary with status `queued` and zeroed counters
    async fn init_summary(&self, summary_id: &str) -> IngestResult<()>;

    /// Drop the summary and its report-key set
    async fn discard_summary(&self, summary_id: &str) -> IngestResult<()>;

    /// Create the working copy of `report`, or append its expenses to the
    /// existing copy, as one atomic step
    async fn upsert_working_report(&self, report: &Report) -> IngestResult<()>;

    /// Add the delta's keys to the membership set, apply its non-zero
    /// counters, and promote the status from `queued` to `processing`
    async fn record_progress(&self, summary_id: &str, delta: &ProgressDelta) -> IngestResult<()>;

    async fn record_chunk_failure(&self, summary_id: &str) -> IngestResult<()>;

    /// Current summary with `totalReports` derived from the membership set
    async fn summary(&self, summary_id: &str) -> IngestResult<Option<UploadSummary>>;

    async fn report_keys(&self, summary_id: &str) -> IngestResult<Vec<ReportKey>>;

    async fn working_report(&self, key: &ReportKey) -> IngestResult<Option<Report>>;

    /// Mark the summary completed and let its progress keys expire after
    /// `retention`
    async fn complete_summary(&self, summary_id: &str, retention: Duration) -> IngestResult<()>;
}

/// Permanent record of truth
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert records whose id is not already stored; returns how many were
    /// new
    async fn insert_expenses(&self, records: &[ExpenseRecord]) -> IngestResult<u64>;

    async fn find_expense(&self, expense_id: &str) -> IngestResult<Option<ExpenseRecord>>;

    /// Every completed record under any of `keys`
    async fn find_completed_expenses(&self, keys: &[ReportKey])
        -> IngestResult<Vec<ExpenseRecord>>;

    /// Insert or replace finalized reports by key
    async fn save_reports(&self, reports: &[Report]) -> IngestResult<()>;

    async fn find_report(&self, key: &ReportKey) -> IngestResult<Option<Report>>;

    async fn upsert_summary(&self, summary: &UploadSummary) -> IngestResult<()>;

    async fn find_summary(&self, summary_id: &str) -> IngestResult<Option<UploadSummary>>;
}
