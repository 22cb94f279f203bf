//! Per-chunk writes to both stores
//!
//! The durable insert and the cache update run concurrently. Every cache
//! write is commutative (set union, counter increment, merge-by-id append),
//! so chunks may finish in any order.

use futures::future::join_all;
use std::sync::Arc;
use tally_common::types::{ExpenseRecord, Report};
use tracing::{debug, error, warn};

use crate::error::{IngestError, IngestResult};
use crate::store::{CacheStore, ProgressDelta, RecordStore};

/// What happened to one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub records: usize,
    /// New durable rows; `None` when the insert failed
    pub inserted: Option<u64>,
    pub cache_updated: bool,
}

impl ChunkOutcome {
    pub fn is_clean(&self) -> bool {
        self.inserted.is_some() && self.cache_updated
    }
}

pub struct DualStoreAggregator {
    cache: Arc<dyn CacheStore>,
    records: Arc<dyn RecordStore>,
}

impl DualStoreAggregator {
    pub fn new(cache: Arc<dyn CacheStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { cache, records }
    }

    /// Persist a classified chunk and fold it into the job's live progress
    ///
    /// Failures are contained here: a failed durable insert is logged and the
    /// chunk still counts, and a working report or progress write that fails
    /// bumps the summary's failed-chunk counter.
    pub async fn process(
        &self,
        summary_id: &str,
        chunk_index: usize,
        chunk: &[ExpenseRecord],
    ) -> ChunkOutcome {
        let (durable, cache) = tokio::join!(
            self.records.insert_expenses(chunk),
            self.update_cache(summary_id, chunk)
        );

        let inserted = match durable {
            Ok(inserted) => Some(inserted),
            Err(e) => {
                let e = match e {
                    IngestError::RecordWrite(_) => e,
                    other => IngestError::RecordWrite(other.to_string()),
                };
                error!(
                    summary_id = %summary_id,
                    chunk = chunk_index,
                    error = %e,
                    "Durable insert failed"
                );
                None
            }
        };

        let cache_updated = match cache {
            Ok(()) => true,
            Err(e) => {
                error!(
                    summary_id = %summary_id,
                    chunk = chunk_index,
                    error = %e,
                    "Cache update failed"
                );
                if let Err(e) = self.cache.record_chunk_failure(summary_id).await {
                    warn!(summary_id = %summary_id, error = %e, "Could not record chunk failure");
                }
                false
            }
        };

        debug!(
            summary_id = %summary_id,
            chunk = chunk_index,
            records = chunk.len(),
            inserted = ?inserted,
            "Chunk aggregated"
        );

        ChunkOutcome {
            records: chunk.len(),
            inserted,
            cache_updated,
        }
    }

    /// Apply the chunk's progress, then report any working-copy failures
    ///
    /// Counters and report-key membership are recorded even when a working
    /// report could not be written; the reconciler rebuilds reports from the
    /// durable rows, so only the live copy is missing.
    async fn update_cache(&self, summary_id: &str, chunk: &[ExpenseRecord]) -> IngestResult<()> {
        let reports = Report::from_expenses(chunk.iter().filter(|r| r.is_completed()));
        let upserts = join_all(
            reports
                .iter()
                .map(|report| self.cache.upsert_working_report(report)),
        )
        .await;

        let delta = ProgressDelta::from_chunk(chunk);
        self.cache.record_progress(summary_id, &delta).await?;

        let failures: Vec<String> = reports
            .iter()
            .zip(upserts)
            .filter_map(|(report, result)| {
                result
                    .err()
                    .map(|e| format!("{}/{}: {}", report.company_id, report.report_id, e))
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(IngestError::Internal(format!(
                "{} working report(s) not written: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ingest::ReportReconciler;
    use crate::store::{MemoryCache, MemoryRecordStore};
    use async_trait::async_trait;
    use std::time::Duration;
    use tally_common::types::{ExpenseStatus, ReportKey, SummaryStatus, UploadSummary};

    fn record(id: &str, report: &str, status: ExpenseStatus) -> ExpenseRecord {
        ExpenseRecord {
            expense_id: id.to_string(),
            company_id: "c1".to_string(),
            report_id: report.to_string(),
            company_name: "Acme".to_string(),
            amount: "12.00".to_string(),
            image: "img".to_string(),
            status: Some(status),
        }
    }

    fn chunk() -> Vec<ExpenseRecord> {
        vec![
            record("e1", "r1", ExpenseStatus::Completed),
            record("e2", "r1", ExpenseStatus::Completed),
            record("e3", "r2", ExpenseStatus::Failed),
            record("e4", "r3", ExpenseStatus::Excluded),
        ]
    }

    #[tokio::test]
    async fn test_chunk_reaches_both_stores() {
        let cache = Arc::new(MemoryCache::new());
        let records = Arc::new(MemoryRecordStore::new());
        cache.init_summary("s1").await.unwrap();

        let aggregator = DualStoreAggregator::new(cache.clone(), records.clone());
        let outcome = aggregator.process("s1", 0, &chunk()).await;

        assert!(outcome.is_clean());
        assert_eq!(outcome.inserted, Some(4));
        assert_eq!(records.expense_count(), 4);

        let summary = cache.summary("s1").await.unwrap().unwrap();
        assert_eq!(summary.total_completed, 2);
        assert_eq!(summary.total_failed, 1);
        assert_eq!(summary.total_excluded, 1);
        assert_eq!(summary.total_reports, 1);
        assert_eq!(summary.status, SummaryStatus::Processing);

        let key = ReportKey::new("c1", "r1").unwrap();
        let report = cache.working_report(&key).await.unwrap().unwrap();
        assert_eq!(report.expenses.len(), 2);
        assert!(cache
            .working_report(&ReportKey::new("c1", "r2").unwrap())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_record_write_failure_still_counts_chunk() {
        let cache = Arc::new(MemoryCache::new());
        let records = Arc::new(MemoryRecordStore::new());
        records.fail_inserts(true);

        let aggregator = DualStoreAggregator::new(cache.clone(), records.clone());
        let outcome = aggregator.process("s1", 0, &chunk()).await;

        assert_eq!(outcome.inserted, None);
        assert!(outcome.cache_updated);
        let summary = cache.summary("s1").await.unwrap().unwrap();
        assert_eq!(summary.total_records(), 4);
        assert_eq!(summary.failed_chunks, 0);
    }

    #[tokio::test]
    async fn test_rejected_row_keeps_the_rest_of_the_chunk() {
        let cache = Arc::new(MemoryCache::new());
        let records = Arc::new(MemoryRecordStore::new());
        records.reject_expense("e3");

        let aggregator = DualStoreAggregator::new(cache.clone(), records.clone());
        let outcome = aggregator.process("s1", 0, &chunk()).await;

        assert!(outcome.is_clean());
        assert_eq!(outcome.inserted, Some(3));
        assert_eq!(records.expense_count(), 3);
        assert!(records.find_expense("e3").await.unwrap().is_none());
        assert!(records.find_expense("e4").await.unwrap().is_some());
    }

    /// Memory cache that refuses working-report writes for one report id
    struct BrokenReports {
        inner: MemoryCache,
        report_id: &'static str,
    }

    impl BrokenReports {
        fn failing(report_id: &'static str) -> Self {
            Self {
                inner: MemoryCache::new(),
                report_id,
            }
        }
    }

    #[async_trait]
    impl CacheStore for BrokenReports {
        async fn init_summary(&self, summary_id: &str) -> IngestResult<()> {
            self.inner.init_summary(summary_id).await
        }
        async fn discard_summary(&self, summary_id: &str) -> IngestResult<()> {
            self.inner.discard_summary(summary_id).await
        }
        async fn upsert_working_report(&self, report: &Report) -> IngestResult<()> {
            if report.report_id == self.report_id {
                return Err(IngestError::Internal("connection reset".to_string()));
            }
            self.inner.upsert_working_report(report).await
        }
        async fn record_progress(
            &self,
            summary_id: &str,
            delta: &ProgressDelta,
        ) -> IngestResult<()> {
            self.inner.record_progress(summary_id, delta).await
        }
        async fn record_chunk_failure(&self, summary_id: &str) -> IngestResult<()> {
            self.inner.record_chunk_failure(summary_id).await
        }
        async fn summary(&self, summary_id: &str) -> IngestResult<Option<UploadSummary>> {
            self.inner.summary(summary_id).await
        }
        async fn report_keys(&self, summary_id: &str) -> IngestResult<Vec<ReportKey>> {
            self.inner.report_keys(summary_id).await
        }
        async fn working_report(&self, key: &ReportKey) -> IngestResult<Option<Report>> {
            self.inner.working_report(key).await
        }
        async fn complete_summary(
            &self,
            summary_id: &str,
            retention: Duration,
        ) -> IngestResult<()> {
            self.inner.complete_summary(summary_id, retention).await
        }
    }

    #[tokio::test]
    async fn test_cache_failure_counts_failed_chunk() {
        let cache = Arc::new(BrokenReports::failing("r1"));
        let records = Arc::new(MemoryRecordStore::new());
        cache.init_summary("s1").await.unwrap();

        let aggregator = DualStoreAggregator::new(cache.clone(), records.clone());
        let outcome = aggregator.process("s1", 3, &chunk()).await;

        assert!(!outcome.cache_updated);
        assert_eq!(records.expense_count(), 4);
        let summary = cache.summary("s1").await.unwrap().unwrap();
        assert_eq!(summary.failed_chunks, 1);
        assert_eq!(summary.total_records(), 4);
        assert_eq!(summary.total_reports, 1);
    }

    #[tokio::test]
    async fn test_one_failed_working_report_keeps_chunk_progress() {
        let cache = Arc::new(BrokenReports::failing("bad"));
        let records = Arc::new(MemoryRecordStore::new());
        cache.init_summary("s1").await.unwrap();

        let mut rows: Vec<ExpenseRecord> = (0..10)
            .map(|i| record(&format!("e{}", i), "r1", ExpenseStatus::Completed))
            .collect();
        rows.push(record("e10", "bad", ExpenseStatus::Completed));

        let aggregator = DualStoreAggregator::new(cache.clone(), records.clone());
        let outcome = aggregator.process("s1", 0, &rows).await;
        assert!(!outcome.cache_updated);

        let summary = cache.summary("s1").await.unwrap().unwrap();
        assert_eq!(summary.total_records(), 11);
        assert_eq!(summary.total_completed, 11);
        assert_eq!(summary.failed_chunks, 1);
        assert_eq!(summary.total_reports, 2);

        let good = ReportKey::new("c1", "r1").unwrap();
        assert_eq!(
            cache.working_report(&good).await.unwrap().unwrap().expenses.len(),
            10
        );

        let reconciler =
            ReportReconciler::new(cache.clone(), records.clone(), Duration::from_secs(60));
        let done = reconciler.finalize("s1").await.unwrap();
        assert_eq!(done.reports_written, 2);
        assert_eq!(done.summary.total_records(), 11);
        let finalized = records.find_report(&good).await.unwrap().unwrap();
        assert_eq!(finalized.expenses.len(), 10);
    }
}
