//! In-process queue for tests and single-node runs

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tally_common::types::UploadJob;
use tokio::sync::{mpsc, Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::{JobHandler, JobQueue};
use crate::error::{IngestError, IngestResult};
use crate::sync::lock;

/// Default deliveries per job before it is dead-lettered
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

struct Delivery {
    job: UploadJob,
    attempt: u32,
}

/// Channel-backed queue
///
/// A job whose handler fails is put back until it has been tried
/// `max_attempts` times, then moved to the dead letters.
pub struct MemoryQueue {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Delivery>>,
    max_attempts: u32,
    outstanding: Arc<AtomicUsize>,
    dead_letters: Mutex<Vec<UploadJob>>,
    shutdown: CancellationToken,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl MemoryQueue {
    pub fn new(max_attempts: u32) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: AsyncMutex::new(receiver),
            max_attempts: max_attempts.max(1),
            outstanding: Arc::new(AtomicUsize::new(0)),
            dead_letters: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Jobs enqueued but not yet acknowledged or dead-lettered
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn dead_letters(&self) -> Vec<UploadJob> {
        lock(&self.dead_letters).clone()
    }

    /// Stop consumers once their running jobs finish
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn deliver(&self, delivery: Delivery) -> IngestResult<()> {
        self.sender
            .send(delivery)
            .map_err(|_| IngestError::Queue("queue receiver dropped".to_string()))
    }

    async fn next_delivery(&self) -> Option<Delivery> {
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            delivery = async { self.receiver.lock().await.recv().await } => delivery,
        }
    }

    /// Wait for a free slot, then for the next delivery
    async fn admit(
        &self,
        slots: &Arc<Semaphore>,
    ) -> IngestResult<Option<(OwnedSemaphorePermit, Delivery)>> {
        let slot = slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IngestError::Internal("worker slots closed".to_string()))?;
        Ok(self.next_delivery().await.map(|delivery| (slot, delivery)))
    }

    fn settle_joined(&self, worker: &str, done: Result<(Delivery, IngestResult<()>), JoinError>) {
        match done {
            Ok((delivery, result)) => self.settle(worker, delivery, result),
            Err(e) => error!(worker = worker, error = %e, "Job task aborted"),
        }
    }

    fn settle(&self, worker: &str, delivery: Delivery, result: IngestResult<()>) {
        let summary_id = delivery.job.summary_id.clone();
        match result {
            Ok(()) => {
                debug!(worker = worker, summary_id = %summary_id, "Job acknowledged");
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
            }
            Err(e) if delivery.attempt < self.max_attempts => {
                warn!(
                    worker = worker,
                    summary_id = %summary_id,
                    attempt = delivery.attempt,
                    error = %e,
                    "Job failed, redelivering"
                );
                let retry = Delivery {
                    job: delivery.job,
                    attempt: delivery.attempt + 1,
                };
                if let Err(e) = self.deliver(retry) {
                    error!(summary_id = %summary_id, error = %e, "Redelivery failed");
                    self.outstanding.fetch_sub(1, Ordering::SeqCst);
                }
            }
            Err(e) => {
                error!(
                    worker = worker,
                    summary_id = %summary_id,
                    attempts = delivery.attempt,
                    error = %e,
                    "Job failed permanently"
                );
                lock(&self.dead_letters).push(delivery.job);
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: UploadJob) -> IngestResult<()> {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.deliver(Delivery { job, attempt: 1 }).inspect_err(|_| {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        })
    }

    async fn consume(
        &self,
        worker: &str,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> IngestResult<()> {
        let slots = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                Some(done) = running.join_next(), if !running.is_empty() => {
                    self.settle_joined(worker, done);
                }
                next = self.admit(&slots) => {
                    let Some((slot, delivery)) = next? else {
                        break;
                    };
                    let handler = handler.clone();
                    running.spawn(async move {
                        let _slot = slot;
                        let result = handler.handle(delivery.job.clone()).await;
                        (delivery, result)
                    });
                }
            }
        }

        while let Some(done) = running.join_next().await {
            self.settle_joined(worker, done);
        }

        debug!(worker = worker, "Consumer stopped");
        Ok(())
    }
}
