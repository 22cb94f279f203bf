//! Job queue and worker pool
//!
//! [`JobQueue`] is the seam between job submission and execution: the
//! service enqueues [`UploadJob`]s, and each worker unit in the
//! [`WorkerPool`] consumes them through a [`JobHandler`]. Delivery is
//! at-least-once; redelivery of failed jobs is the queue's policy.

use async_trait::async_trait;
use std::sync::Arc;
use tally_common::types::UploadJob;

use crate::error::IngestResult;

pub mod apalis_queue;
pub mod memory;
pub mod pool;

pub use apalis_queue::ApalisQueue;
pub use memory::MemoryQueue;
pub use pool::{WorkerPool, WorkerPoolHandle};

/// Executes one job; an error hands the job back to the queue
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: UploadJob) -> IngestResult<()>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Store the job and return without waiting for it to run
    async fn enqueue(&self, job: UploadJob) -> IngestResult<()>;

    /// Consume jobs as worker `worker`, running at most `concurrency` at once,
    /// until the queue shuts down
    async fn consume(
        &self,
        worker: &str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> IngestResult<()>;
}
