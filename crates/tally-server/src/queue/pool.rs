//! Fixed-size pool of queue consumers

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{JobHandler, JobQueue};
use crate::config::IngestSettings;

/// `worker_count` consumers, each running up to `pipelines_per_worker` jobs
///
/// Together with the per-pipeline gate this bounds the records held in
/// memory by the whole process.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    worker_count: usize,
    pipelines_per_worker: usize,
}

/// Running consumers; await [`WorkerPoolHandle::join`] to wait for them
pub struct WorkerPoolHandle {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        worker_count: usize,
        pipelines_per_worker: usize,
    ) -> Self {
        Self {
            queue,
            handler,
            worker_count: worker_count.max(1),
            pipelines_per_worker: pipelines_per_worker.max(1),
        }
    }

    pub fn from_settings(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        settings: &IngestSettings,
    ) -> Self {
        Self::new(
            queue,
            handler,
            settings.worker_count,
            settings.max_concurrent_pipelines,
        )
    }

    pub fn start(self) -> WorkerPoolHandle {
        info!(
            workers = self.worker_count,
            pipelines_per_worker = self.pipelines_per_worker,
            "Starting worker pool"
        );

        let workers = (0..self.worker_count)
            .map(|index| {
                let queue = self.queue.clone();
                let handler = self.handler.clone();
                let concurrency = self.pipelines_per_worker;
                let name = format!("tally-ingest-worker-{}", index);

                tokio::spawn(async move {
                    if let Err(e) = queue.consume(&name, concurrency, handler).await {
                        error!(worker = %name, error = %e, "Worker stopped with error");
                    }
                })
            })
            .collect();

        WorkerPoolHandle { workers }
    }
}

impl WorkerPoolHandle {
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task panicked");
            }
        }
    }

    pub fn abort(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
