//! Shared fixtures for the integration tests
//!
//! Every backend is the in-process one, so the whole pipeline runs without
//! Redis, Postgres or S3.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use tally_common::types::UploadJob;
use tally_server::config::IngestSettings;
use tally_server::ingest::{DefaultPolicy, IngestionPipeline};
use tally_server::queue::MemoryQueue;
use tally_server::service::ExpenseService;
use tally_server::source::{MemoryObjectSource, ObjectLocation};
use tally_server::store::{MemoryCache, MemoryRecordStore};

pub const REGION: &str = "eu-west-1";
pub const BUCKET: &str = "expense-uploads";

pub const HEADER: &str = "expenseId,companyId,reportId,companyName,amount,image\n";

pub struct Harness {
    pub source: Arc<MemoryObjectSource>,
    pub cache: Arc<MemoryCache>,
    pub records: Arc<MemoryRecordStore>,
    pub queue: Arc<MemoryQueue>,
    pub pipeline: Arc<IngestionPipeline>,
    pub service: ExpenseService,
}

impl Harness {
    pub fn new(settings: IngestSettings) -> Self {
        let source = Arc::new(MemoryObjectSource::new());
        let cache = Arc::new(MemoryCache::new());
        let records = Arc::new(MemoryRecordStore::new());
        let queue = Arc::new(MemoryQueue::default());

        let pipeline = Arc::new(IngestionPipeline::new(
            source.clone(),
            cache.clone(),
            records.clone(),
            Arc::new(DefaultPolicy::from_settings(&settings)),
            &settings,
        ));
        let service = ExpenseService::new(
            source.clone(),
            cache.clone(),
            records.clone(),
            queue.clone(),
        );

        Self {
            source,
            cache,
            records,
            queue,
            pipeline,
            service,
        }
    }

    pub fn put_csv(&self, key: &str, csv: impl Into<String>) {
        self.source
            .put(ObjectLocation::new(REGION, BUCKET, key), csv.into().into_bytes());
    }

    pub fn url(key: &str) -> String {
        format!("https://s3.{}.amazonaws.com/{}/{}", REGION, BUCKET, key)
    }

    pub fn job(summary_id: &str, key: &str) -> UploadJob {
        UploadJob::new(summary_id, REGION, BUCKET, key)
    }
}

/// Settings that exclude `excl-co` and keep chunks small
pub fn settings() -> IngestSettings {
    IngestSettings {
        batch_size: 4,
        max_processing_per_stream: 3,
        range_window_bytes: 128,
        excluded_companies: ["excl-co".to_string()].into_iter().collect(),
        ..IngestSettings::default()
    }
}

/// `rows` expenses spread over `reports` reports of one company, with every
/// fifth row failing on a zero amount
pub fn generated_csv(rows: usize, reports: usize) -> String {
    let mut csv = HEADER.to_string();
    for i in 0..rows {
        let amount = if i % 5 == 0 { "0".to_string() } else { format!("{}.25", i) };
        csv.push_str(&format!(
            "exp-{i},c1,r{},Acme,{amount},receipt-{i}.png\n",
            i % reports.max(1)
        ));
    }
    csv
}
