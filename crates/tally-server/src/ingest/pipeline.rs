//! One ingestion run, end to end
//!
//! reader -> decoder -> batcher -> (gate) -> classifier -> aggregator, then
//! the reconciler once every admitted chunk has finished.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tally_common::types::UploadJob;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, instrument};

use super::aggregate::{ChunkOutcome, DualStoreAggregator};
use super::classify::{classify_chunk, ClassificationPolicy};
use super::decode::{batch_records, decode_records};
use super::gate::BackpressureGate;
use super::reconcile::{Reconciliation, ReportReconciler};
use crate::config::IngestSettings;
use crate::error::IngestResult;
use crate::queue::JobHandler;
use crate::source::{ObjectLocation, ObjectSource, RangedObjectReader};
use crate::store::{CacheStore, RecordStore};

/// Statistics for a finished run
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub chunks: usize,
    pub records: usize,
    /// Chunks with a failed durable insert, failed cache update, or panic
    pub unclean_chunks: usize,
    pub peak_in_flight: usize,
    pub reconciliation: Reconciliation,
}

pub struct IngestionPipeline {
    source: Arc<dyn ObjectSource>,
    policy: Arc<dyn ClassificationPolicy>,
    aggregator: Arc<DualStoreAggregator>,
    reconciler: ReportReconciler,
    window_bytes: u64,
    batch_size: usize,
    max_in_flight: usize,
}

#[derive(Default)]
struct Tally {
    chunks: usize,
    records: usize,
    unclean: usize,
}

impl Tally {
    fn absorb(&mut self, joined: Result<ChunkOutcome, JoinError>) {
        self.chunks += 1;
        match joined {
            Ok(outcome) => {
                self.records += outcome.records;
                if !outcome.is_clean() {
                    self.unclean += 1;
                }
            }
            Err(e) => {
                error!(error = %e, "Chunk task aborted");
                self.unclean += 1;
            }
        }
    }
}

impl IngestionPipeline {
    pub fn new(
        source: Arc<dyn ObjectSource>,
        cache: Arc<dyn CacheStore>,
        records: Arc<dyn RecordStore>,
        policy: Arc<dyn ClassificationPolicy>,
        settings: &IngestSettings,
    ) -> Self {
        Self {
            source,
            policy,
            aggregator: Arc::new(DualStoreAggregator::new(cache.clone(), records.clone())),
            reconciler: ReportReconciler::new(cache, records, settings.summary_retention()),
            window_bytes: settings.range_window_bytes,
            batch_size: settings.batch_size,
            max_in_flight: settings.max_processing_per_stream,
        }
    }

    /// Ingest the job's object and finalize its reports
    ///
    /// A transfer or decode failure stops reading, waits for admitted chunks
    /// to finish, and returns the error without finalizing; the summary stays
    /// short of `completed`.
    #[instrument(skip(self, job), fields(summary_id = %job.summary_id, key = %job.key))]
    pub async fn run(&self, job: &UploadJob) -> IngestResult<PipelineStats> {
        let started = Instant::now();
        let location = ObjectLocation::new(&job.region, &job.bucket, &job.key);
        info!(location = %location, "Ingestion started");

        let reader = RangedObjectReader::new(self.source.clone(), location, self.window_bytes);
        let mut chunks = Box::pin(batch_records(
            decode_records(reader.into_stream()),
            self.batch_size,
        ));

        let gate = BackpressureGate::new(self.max_in_flight);
        let mut tasks = JoinSet::new();
        let mut tally = Tally::default();
        let mut next_index = 0;

        let stream_result = loop {
            let permit = match gate.admit().await {
                Ok(permit) => permit,
                Err(e) => break Err(e),
            };

            let mut chunk = match chunks.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => break Err(e),
                None => break Ok(()),
            };

            let index = next_index;
            next_index += 1;
            let policy = self.policy.clone();
            let aggregator = self.aggregator.clone();
            let summary_id = job.summary_id.clone();

            tasks.spawn(async move {
                let _permit = permit;
                classify_chunk(policy.as_ref(), &mut chunk);
                aggregator.process(&summary_id, index, &chunk).await
            });

            while let Some(joined) = tasks.try_join_next() {
                tally.absorb(joined);
            }
        };

        while let Some(joined) = tasks.join_next().await {
            tally.absorb(joined);
        }

        if let Err(e) = stream_result {
            error!(
                chunks = tally.chunks,
                records = tally.records,
                error = %e,
                "Ingestion stream failed"
            );
            return Err(e);
        }

        let reconciliation = self.reconciler.finalize(&job.summary_id).await?;

        info!(
            chunks = tally.chunks,
            records = tally.records,
            unclean_chunks = tally.unclean,
            peak_in_flight = gate.peak(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingestion finished"
        );

        Ok(PipelineStats {
            chunks: tally.chunks,
            records: tally.records,
            unclean_chunks: tally.unclean,
            peak_in_flight: gate.peak(),
            reconciliation,
        })
    }
}

#[async_trait]
impl JobHandler for IngestionPipeline {
    async fn handle(&self, job: UploadJob) -> IngestResult<()> {
        self.run(&job).await.map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::ingest::DefaultPolicy;
    use crate::source::MemoryObjectSource;
    use crate::store::{MemoryCache, MemoryRecordStore};
    use tally_common::types::SummaryStatus;

    const HEADER: &str = "expenseId,companyId,reportId,companyName,amount,image\n";

    fn job() -> UploadJob {
        UploadJob::new("s1", "eu-west-1", "bucket", "expenses.csv")
    }

    fn setup(
        csv: &str,
        settings: IngestSettings,
    ) -> (Arc<MemoryCache>, Arc<MemoryRecordStore>, IngestionPipeline) {
        let source = Arc::new(MemoryObjectSource::new());
        source.put(
            ObjectLocation::new("eu-west-1", "bucket", "expenses.csv"),
            csv.as_bytes().to_vec(),
        );
        let cache = Arc::new(MemoryCache::new());
        let records = Arc::new(MemoryRecordStore::new());
        let pipeline = IngestionPipeline::new(
            source,
            cache.clone(),
            records.clone(),
            Arc::new(DefaultPolicy::from_settings(&settings)),
            &settings,
        );
        (cache, records, pipeline)
    }

    fn csv_with_rows(rows: usize) -> String {
        let mut csv = HEADER.to_string();
        for i in 0..rows {
            csv.push_str(&format!("e{i},c{},r1,Co,{}.50,img{i}\n", i % 4, i % 9 + 2));
        }
        csv
    }

    #[tokio::test]
    async fn test_gate_bounds_chunks_in_flight() {
        let settings = IngestSettings {
            batch_size: 3,
            max_processing_per_stream: 2,
            range_window_bytes: 64,
            ..IngestSettings::default()
        };
        let (cache, _records, pipeline) = setup(&csv_with_rows(40), settings);
        cache.init_summary("s1").await.unwrap();

        let stats = pipeline.run(&job()).await.unwrap();

        assert_eq!(stats.chunks, 14);
        assert_eq!(stats.records, 40);
        assert!(stats.peak_in_flight <= 2);
        assert_eq!(stats.unclean_chunks, 0);
        assert_eq!(stats.reconciliation.summary.total_records(), 40);
    }

    #[tokio::test]
    async fn test_decode_failure_leaves_job_unfinished() {
        let csv = format!("{}e1,c1,r1,Co,3.00,img\nbroken\n", HEADER);
        let (cache, records, pipeline) = setup(&csv, IngestSettings::default());
        cache.init_summary("s1").await.unwrap();

        let err = pipeline.run(&job()).await.unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));

        let summary = cache.summary("s1").await.unwrap().unwrap();
        assert_ne!(summary.status, SummaryStatus::Completed);
        assert!(records.find_summary("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_header_only_file_completes_empty() {
        let (cache, _records, pipeline) = setup(HEADER, IngestSettings::default());
        cache.init_summary("s1").await.unwrap();

        let stats = pipeline.run(&job()).await.unwrap();
        assert_eq!(stats.chunks, 0);
        assert_eq!(stats.reconciliation.summary.status, SummaryStatus::Completed);
        assert_eq!(stats.reconciliation.summary.total_records(), 0);
    }
}
