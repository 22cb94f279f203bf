//! Job submission and lookups
//!
//! [`ExpenseService`] is everything the HTTP layer needs: it validates and
//! enqueues uploads and answers reads from whichever store currently owns
//! the data.

use std::sync::Arc;
use tally_common::types::{ExpenseRecord, Report, ReportKey, UploadJob, UploadSummary};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{IngestError, IngestResult};
use crate::queue::JobQueue;
use crate::source::{parse_source_url, ObjectSource};
use crate::store::{CacheStore, RecordStore};

#[derive(Clone)]
pub struct ExpenseService {
    source: Arc<dyn ObjectSource>,
    cache: Arc<dyn CacheStore>,
    records: Arc<dyn RecordStore>,
    queue: Arc<dyn JobQueue>,
}

impl ExpenseService {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        cache: Arc<dyn CacheStore>,
        records: Arc<dyn RecordStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            source,
            cache,
            records,
            queue,
        }
    }

    /// Accept an object URL for ingestion
    ///
    /// Returns the new summary id, or `None` when the URL cannot be parsed or
    /// names an object that does not exist. Nothing is enqueued in that case.
    #[instrument(skip(self))]
    pub async fn submit_ingestion(&self, url: &str) -> IngestResult<Option<String>> {
        match self.try_submit(url).await {
            Ok(summary_id) => Ok(Some(summary_id)),
            Err(IngestError::InvalidSourceReference(reason)) => {
                info!(url = url, reason = %reason, "Upload rejected");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn try_submit(&self, url: &str) -> IngestResult<String> {
        let location = parse_source_url(url).ok_or_else(|| {
            IngestError::InvalidSourceReference(format!("unparseable URL {}", url))
        })?;

        if !self.source.exists(&location).await? {
            return Err(IngestError::InvalidSourceReference(format!(
                "no object at {}",
                location
            )));
        }

        let summary_id = Uuid::new_v4().to_string();
        self.cache.init_summary(&summary_id).await?;
        let job = UploadJob::new(&summary_id, location.region, location.bucket, location.key);
        if let Err(e) = self.queue.enqueue(job).await {
            if let Err(cleanup) = self.cache.discard_summary(&summary_id).await {
                warn!(
                    summary_id = %summary_id,
                    error = %cleanup,
                    "Could not discard unqueued summary"
                );
            }
            return Err(e);
        }

        info!(summary_id = %summary_id, "Upload queued");
        Ok(summary_id)
    }

    /// Live summary from the cache, else the durable copy
    #[instrument(skip(self))]
    pub async fn get_summary(&self, summary_id: &str) -> IngestResult<Option<UploadSummary>> {
        if let Some(summary) = self.cache.summary(summary_id).await? {
            return Ok(Some(summary));
        }
        self.records.find_summary(summary_id).await
    }

    /// Working copy, then finalized report, then a rebuild from durable rows
    #[instrument(skip(self))]
    pub async fn get_report(
        &self,
        company_id: &str,
        report_id: &str,
    ) -> IngestResult<Option<Report>> {
        let key = match ReportKey::new(company_id, report_id) {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "Report lookup with invalid key");
                return Ok(None);
            }
        };

        if let Some(report) = self.cache.working_report(&key).await? {
            return Ok(Some(report));
        }

        if let Some(report) = self.records.find_report(&key).await? {
            return Ok(Some(report));
        }

        let expenses = self
            .records
            .find_completed_expenses(std::slice::from_ref(&key))
            .await?;
        let rebuilt = Report::from_expenses(&expenses).into_iter().next();
        if rebuilt.is_some() {
            debug!(key = %key, "Report rebuilt from durable rows");
        }
        Ok(rebuilt)
    }

    #[instrument(skip(self))]
    pub async fn get_expense(&self, expense_id: &str) -> IngestResult<Option<ExpenseRecord>> {
        self.records.find_expense(expense_id).await
    }
}
