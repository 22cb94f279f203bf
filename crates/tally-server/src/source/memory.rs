//! In-process object source for tests and local runs

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{ObjectLocation, ObjectSource, RangeResponse};
use crate::error::{IngestError, IngestResult};
use crate::sync::lock;

/// Objects held in memory, with a log of every ranged fetch served
#[derive(Default)]
pub struct MemoryObjectSource {
    objects: Mutex<HashMap<ObjectLocation, Bytes>>,
    fetches: Mutex<Vec<(u64, u64)>>,
}

impl MemoryObjectSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, location: ObjectLocation, data: impl Into<Bytes>) {
        lock(&self.objects).insert(location, data.into());
    }

    /// `(start, end_inclusive)` of each fetch, in request order
    pub fn fetch_log(&self) -> Vec<(u64, u64)> {
        lock(&self.fetches).clone()
    }
}

#[async_trait]
impl ObjectSource for MemoryObjectSource {
    async fn fetch_range(
        &self,
        location: &ObjectLocation,
        start: u64,
        end_inclusive: u64,
    ) -> IngestResult<RangeResponse> {
        lock(&self.fetches).push((start, end_inclusive));

        let data = lock(&self.objects)
            .get(location)
            .cloned()
            .ok_or_else(|| IngestError::Transfer(format!("No such object {}", location)))?;

        let total_length = data.len() as u64;
        if total_length == 0 {
            return Ok(RangeResponse::empty());
        }

        if start >= total_length {
            return Err(IngestError::Transfer(format!(
                "Range start {} beyond end of {} ({} bytes)",
                start, location, total_length
            )));
        }

        let range_end = end_inclusive.min(total_length - 1);
        Ok(RangeResponse {
            bytes: data.slice(start as usize..=range_end as usize),
            range_start: start,
            range_end,
            total_length,
        })
    }

    async fn exists(&self, location: &ObjectLocation) -> IngestResult<bool> {
        Ok(lock(&self.objects).contains_key(location))
    }
}
