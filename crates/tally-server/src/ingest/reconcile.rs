//! Job finalization
//!
//! Runs once the pipeline has drained. Finalized reports are re-derived from
//! the durable expenses, never from the cache's working copies.

use std::sync::Arc;
use std::time::Duration;
use tally_common::types::{Report, ReportKey, SummaryStatus, UploadSummary};
use tracing::{info, instrument, warn};

use crate::error::IngestResult;
use crate::store::{CacheStore, RecordStore};

/// Result of finalizing one job
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub reports_written: usize,
    pub summary: UploadSummary,
}

pub struct ReportReconciler {
    cache: Arc<dyn CacheStore>,
    records: Arc<dyn RecordStore>,
    retention: Duration,
}

impl ReportReconciler {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        records: Arc<dyn RecordStore>,
        retention: Duration,
    ) -> Self {
        Self {
            cache,
            records,
            retention,
        }
    }

    /// Write finalized reports and the completed summary
    ///
    /// Safe to repeat: reports are rebuilt from the same durable rows and
    /// upserted by key, and a summary whose cache state has already expired
    /// keeps its durable copy.
    #[instrument(skip(self))]
    pub async fn finalize(&self, summary_id: &str) -> IngestResult<Reconciliation> {
        let keys = self.cache.report_keys(summary_id).await?;

        let (reports_written, summary) = tokio::try_join!(
            self.finalize_reports(&keys),
            self.finalize_summary(summary_id)
        )?;

        info!(
            summary_id = %summary_id,
            reports = reports_written,
            completed = summary.total_completed,
            excluded = summary.total_excluded,
            failed = summary.total_failed,
            failed_chunks = summary.failed_chunks,
            "Job finalized"
        );

        Ok(Reconciliation {
            reports_written,
            summary,
        })
    }

    async fn finalize_reports(&self, keys: &[ReportKey]) -> IngestResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }

        let expenses = self.records.find_completed_expenses(keys).await?;
        let reports = Report::from_expenses(&expenses);
        self.records.save_reports(&reports).await?;
        Ok(reports.len())
    }

    async fn finalize_summary(&self, summary_id: &str) -> IngestResult<UploadSummary> {
        let live = self.cache.summary(summary_id).await?;

        let mut summary = match live {
            Some(summary) => summary,
            None => match self.records.find_summary(summary_id).await? {
                Some(durable) if durable.status == SummaryStatus::Completed => return Ok(durable),
                Some(durable) => durable,
                None => {
                    warn!(summary_id = %summary_id, "No progress recorded for job");
                    UploadSummary::new(summary_id)
                }
            },
        };

        summary.status = summary.status.advance(SummaryStatus::Completed);
        self.records.upsert_summary(&summary).await?;
        self.cache.complete_summary(summary_id, self.retention).await?;
        Ok(summary)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{MemoryCache, MemoryRecordStore, ProgressDelta};
    use tally_common::types::{ExpenseRecord, ExpenseStatus};

    fn record(id: &str, report: &str, status: ExpenseStatus) -> ExpenseRecord {
        ExpenseRecord {
            expense_id: id.to_string(),
            company_id: "c1".to_string(),
            report_id: report.to_string(),
            company_name: "Acme".to_string(),
            amount: "8.00".to_string(),
            image: "img".to_string(),
            status: Some(status),
        }
    }

    async fn seeded() -> (Arc<MemoryCache>, Arc<MemoryRecordStore>, ReportReconciler) {
        let cache = Arc::new(MemoryCache::new());
        let records = Arc::new(MemoryRecordStore::new());

        let chunk = vec![
            record("e1", "r1", ExpenseStatus::Completed),
            record("e2", "r1", ExpenseStatus::Failed),
            record("e3", "r1", ExpenseStatus::Completed),
        ];
        records.insert_expenses(&chunk).await.unwrap();
        cache.init_summary("s1").await.unwrap();
        cache
            .record_progress("s1", &ProgressDelta::from_chunk(&chunk))
            .await
            .unwrap();

        let reconciler =
            ReportReconciler::new(cache.clone(), records.clone(), Duration::from_secs(60));
        (cache, records, reconciler)
    }

    #[tokio::test]
    async fn test_finalize_builds_reports_from_durable_rows() {
        let (cache, records, reconciler) = seeded().await;

        let outcome = reconciler.finalize("s1").await.unwrap();
        assert_eq!(outcome.reports_written, 1);
        assert_eq!(outcome.summary.status, SummaryStatus::Completed);
        assert_eq!(outcome.summary.total_reports, 1);

        let key = ReportKey::new("c1", "r1").unwrap();
        let report = records.find_report(&key).await.unwrap().unwrap();
        let ids: Vec<_> = report.expenses.iter().map(|e| e.expense_id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e3"]);

        let durable = records.find_summary("s1").await.unwrap().unwrap();
        assert_eq!(durable.total_completed, 2);
        assert_eq!(durable.total_failed, 1);
        assert_eq!(
            cache.summary("s1").await.unwrap().unwrap().status,
            SummaryStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_finalize_twice_changes_nothing() {
        let (_cache, records, reconciler) = seeded().await;
        let key = ReportKey::new("c1", "r1").unwrap();

        reconciler.finalize("s1").await.unwrap();
        let first = records.find_report(&key).await.unwrap();
        let first_summary = records.find_summary("s1").await.unwrap();

        reconciler.finalize("s1").await.unwrap();
        assert_eq!(records.find_report(&key).await.unwrap(), first);
        assert_eq!(records.find_summary("s1").await.unwrap(), first_summary);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_after_expiry_keeps_durable_summary() {
        let (_cache, records, reconciler) = seeded().await;
        reconciler.finalize("s1").await.unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;

        let again = reconciler.finalize("s1").await.unwrap();
        assert_eq!(again.reports_written, 0);
        assert_eq!(again.summary.total_completed, 2);
        assert_eq!(
            records.find_summary("s1").await.unwrap().unwrap().total_completed,
            2
        );
    }
}
