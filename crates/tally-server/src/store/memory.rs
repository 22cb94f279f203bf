//! In-process stores for tests and single-node runs

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tally_common::types::{ExpenseRecord, Report, ReportKey, SummaryStatus, UploadSummary};
use tokio::time::Instant;
use tracing::warn;

use super::{CacheStore, ProgressDelta, RecordStore};
use crate::error::{IngestError, IngestResult};
use crate::sync::lock;

/// Cache store held in process memory
///
/// Expiry follows the tokio clock, so tests can pause and advance time.
#[derive(Default)]
pub struct MemoryCache {
    summaries: Mutex<HashMap<String, UploadSummary>>,
    members: Mutex<HashMap<String, BTreeSet<ReportKey>>>,
    reports: Mutex<HashMap<ReportKey, Report>>,
    expires_at: Mutex<HashMap<String, Instant>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summaries currently held, expired or not
    pub fn summary_count(&self) -> usize {
        lock(&self.summaries).len()
    }

    fn expired(&self, summary_id: &str) -> bool {
        matches!(lock(&self.expires_at).get(summary_id), Some(at) if Instant::now() >= *at)
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn init_summary(&self, summary_id: &str) -> IngestResult<()> {
        lock(&self.summaries).insert(summary_id.to_string(), UploadSummary::new(summary_id));
        lock(&self.expires_at).remove(summary_id);
        Ok(())
    }

    async fn discard_summary(&self, summary_id: &str) -> IngestResult<()> {
        lock(&self.summaries).remove(summary_id);
        lock(&self.members).remove(summary_id);
        lock(&self.expires_at).remove(summary_id);
        Ok(())
    }

    async fn upsert_working_report(&self, report: &Report) -> IngestResult<()> {
        let key = report.key()?;
        lock(&self.reports)
            .entry(key)
            .and_modify(|existing| existing.extend_unique(report.expenses.iter().cloned()))
            .or_insert_with(|| report.clone());
        Ok(())
    }

    async fn record_progress(&self, summary_id: &str, delta: &ProgressDelta) -> IngestResult<()> {
        lock(&self.members)
            .entry(summary_id.to_string())
            .or_default()
            .extend(delta.report_keys.iter().cloned());

        let mut summaries = lock(&self.summaries);
        let summary = summaries
            .entry(summary_id.to_string())
            .or_insert_with(|| UploadSummary::new(summary_id));
        summary.total_completed += delta.completed;
        summary.total_excluded += delta.excluded;
        summary.total_failed += delta.failed;
        summary.status = summary.status.advance(SummaryStatus::Processing);
        Ok(())
    }

    async fn record_chunk_failure(&self, summary_id: &str) -> IngestResult<()> {
        lock(&self.summaries)
            .entry(summary_id.to_string())
            .or_insert_with(|| UploadSummary::new(summary_id))
            .failed_chunks += 1;
        Ok(())
    }

    async fn summary(&self, summary_id: &str) -> IngestResult<Option<UploadSummary>> {
        if self.expired(summary_id) {
            return Ok(None);
        }

        let Some(mut summary) = lock(&self.summaries).get(summary_id).cloned() else {
            return Ok(None);
        };
        summary.total_reports = lock(&self.members)
            .get(summary_id)
            .map_or(0, |keys| keys.len() as i64);
        Ok(Some(summary))
    }

    async fn report_keys(&self, summary_id: &str) -> IngestResult<Vec<ReportKey>> {
        if self.expired(summary_id) {
            return Ok(Vec::new());
        }
        Ok(lock(&self.members)
            .get(summary_id)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn working_report(&self, key: &ReportKey) -> IngestResult<Option<Report>> {
        Ok(lock(&self.reports).get(key).cloned())
    }

    async fn complete_summary(&self, summary_id: &str, retention: Duration) -> IngestResult<()> {
        if let Some(summary) = lock(&self.summaries).get_mut(summary_id) {
            summary.status = summary.status.advance(SummaryStatus::Completed);
        }
        lock(&self.expires_at).insert(summary_id.to_string(), Instant::now() + retention);
        Ok(())
    }
}

/// Durable store held in process memory
#[derive(Default)]
pub struct MemoryRecordStore {
    expenses: Mutex<BTreeMap<String, ExpenseRecord>>,
    reports: Mutex<HashMap<ReportKey, Report>>,
    summaries: Mutex<HashMap<String, UploadSummary>>,
    fail_inserts: AtomicBool,
    rejected: Mutex<HashSet<String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `insert_expenses` call fail
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Refuse the expense with this id on every following insert
    pub fn reject_expense(&self, expense_id: &str) {
        lock(&self.rejected).insert(expense_id.to_string());
    }

    pub fn expense_count(&self) -> usize {
        lock(&self.expenses).len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_expenses(&self, records: &[ExpenseRecord]) -> IngestResult<u64> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(IngestError::RecordWrite(format!(
                "insert of {} records rejected",
                records.len()
            )));
        }

        let rejected = lock(&self.rejected);
        let mut expenses = lock(&self.expenses);
        let mut inserted = 0;
        let mut refused = 0;
        for record in records {
            if rejected.contains(&record.expense_id) {
                warn!(expense_id = %record.expense_id, "Expense rejected");
                refused += 1;
            } else if !expenses.contains_key(&record.expense_id) {
                expenses.insert(record.expense_id.clone(), record.clone());
                inserted += 1;
            }
        }

        if !records.is_empty() && refused == records.len() {
            return Err(IngestError::RecordWrite(format!(
                "all {} expenses rejected",
                records.len()
            )));
        }
        Ok(inserted)
    }

    async fn find_expense(&self, expense_id: &str) -> IngestResult<Option<ExpenseRecord>> {
        Ok(lock(&self.expenses).get(expense_id).cloned())
    }

    async fn find_completed_expenses(
        &self,
        keys: &[ReportKey],
    ) -> IngestResult<Vec<ExpenseRecord>> {
        let wanted: HashSet<&ReportKey> = keys.iter().collect();
        Ok(lock(&self.expenses)
            .values()
            .filter(|r| r.is_completed())
            .filter(|r| r.report_key().is_ok_and(|key| wanted.contains(&key)))
            .cloned()
            .collect())
    }

    async fn save_reports(&self, reports: &[Report]) -> IngestResult<()> {
        let mut stored = lock(&self.reports);
        for report in reports {
            stored.insert(report.key()?, report.clone());
        }
        Ok(())
    }

    async fn find_report(&self, key: &ReportKey) -> IngestResult<Option<Report>> {
        Ok(lock(&self.reports).get(key).cloned())
    }

    async fn upsert_summary(&self, summary: &UploadSummary) -> IngestResult<()> {
        lock(&self.summaries).insert(summary.summary_id.clone(), summary.clone());
        Ok(())
    }

    async fn find_summary(&self, summary_id: &str) -> IngestResult<Option<UploadSummary>> {
        Ok(lock(&self.summaries).get(summary_id).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tally_common::types::{ExpenseStatus, MinifiedExpense};

    fn key() -> ReportKey {
        ReportKey::new("c1", "r1").unwrap()
    }

    fn report(ids: &[&str]) -> Report {
        Report {
            company_id: "c1".to_string(),
            report_id: "r1".to_string(),
            company_name: "Acme".to_string(),
            expenses: ids
                .iter()
                .map(|id| MinifiedExpense {
                    expense_id: id.to_string(),
                    amount: "2.00".to_string(),
                    image: "img".to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_working_report_create_then_append() {
        let cache = MemoryCache::new();
        cache.upsert_working_report(&report(&["e1"])).await.unwrap();
        cache.upsert_working_report(&report(&["e1", "e2"])).await.unwrap();

        let stored = cache.working_report(&key()).await.unwrap().unwrap();
        let ids: Vec<_> = stored.expenses.iter().map(|e| e.expense_id.as_str()).collect();
        assert_eq!(ids, vec!["e1", "e2"]);
    }

    #[tokio::test]
    async fn test_progress_never_demotes_completed() {
        let cache = MemoryCache::new();
        cache.init_summary("s1").await.unwrap();
        cache
            .complete_summary("s1", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .record_progress("s1", &ProgressDelta { failed: 1, ..Default::default() })
            .await
            .unwrap();

        let summary = cache.summary("s1").await.unwrap().unwrap();
        assert_eq!(summary.status, SummaryStatus::Completed);
        assert_eq!(summary.total_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_summary_expires_after_retention() {
        let cache = MemoryCache::new();
        cache.init_summary("s1").await.unwrap();
        cache
            .complete_summary("s1", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.summary("s1").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.summary("s1").await.unwrap().is_none());
        assert!(cache.report_keys("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_expenses_ignores_known_ids() {
        let store = MemoryRecordStore::new();
        let mut record = ExpenseRecord {
            expense_id: "e1".to_string(),
            company_id: "c1".to_string(),
            report_id: "r1".to_string(),
            company_name: "Acme".to_string(),
            amount: "3.00".to_string(),
            image: "img".to_string(),
            status: Some(ExpenseStatus::Completed),
        };

        assert_eq!(store.insert_expenses(&[record.clone()]).await.unwrap(), 1);
        record.amount = "4.00".to_string();
        assert_eq!(store.insert_expenses(&[record]).await.unwrap(), 0);

        let stored = store.find_expense("e1").await.unwrap().unwrap();
        assert_eq!(stored.amount, "3.00");
        assert_eq!(store.find_completed_expenses(&[key()]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_row_does_not_block_the_rest() {
        let store = MemoryRecordStore::new();
        store.reject_expense("e2");
        let records: Vec<_> = ["e1", "e2", "e3"]
            .iter()
            .map(|id| ExpenseRecord {
                expense_id: id.to_string(),
                company_id: "c1".to_string(),
                report_id: "r1".to_string(),
                company_name: "Acme".to_string(),
                amount: "1.00".to_string(),
                image: "img".to_string(),
                status: Some(ExpenseStatus::Completed),
            })
            .collect();

        assert_eq!(store.insert_expenses(&records).await.unwrap(), 2);
        assert!(store.find_expense("e2").await.unwrap().is_none());
        assert_eq!(store.expense_count(), 2);

        let err = store.insert_expenses(&records[1..2]).await.unwrap_err();
        assert!(matches!(err, IngestError::RecordWrite(_)));
    }

    #[tokio::test]
    async fn test_discarded_summary_is_gone() {
        let cache = MemoryCache::new();
        cache.init_summary("s1").await.unwrap();
        cache.discard_summary("s1").await.unwrap();

        assert_eq!(cache.summary_count(), 0);
        assert!(cache.summary("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failing_inserts_report_record_write() {
        let store = MemoryRecordStore::new();
        store.fail_inserts(true);
        let err = store.insert_expenses(&[]).await.unwrap_err();
        assert!(matches!(err, IngestError::RecordWrite(_)));
    }
}
