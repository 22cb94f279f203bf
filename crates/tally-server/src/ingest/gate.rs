//! Per-pipeline flow control
//!
//! The pipeline takes a permit before pulling the next chunk from the
//! decoder, and the permit travels with the chunk until aggregation finishes.
//! Once every permit is out, pulling stops, so no further windows are fetched
//! or decoded until a chunk completes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{IngestError, IngestResult};

pub struct BackpressureGate {
    permits: Arc<Semaphore>,
    ceiling: usize,
    counters: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Held by one chunk while it is being processed
#[derive(Debug)]
pub struct ChunkPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for ChunkPermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BackpressureGate {
    pub fn new(max_in_flight: usize) -> Self {
        let ceiling = max_in_flight.max(1);
        Self {
            permits: Arc::new(Semaphore::new(ceiling)),
            ceiling,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Wait until fewer than the ceiling's worth of chunks are in flight
    pub async fn admit(&self) -> IngestResult<ChunkPermit> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IngestError::Internal("backpressure gate closed".to_string()))?;

        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);

        Ok(ChunkPermit {
            _permit: permit,
            counters: self.counters.clone(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of chunks ever in flight at once
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn is_drained(&self) -> bool {
        self.permits.available_permits() == self.ceiling
    }
}
