//! Sequential ranged reads over one object

use bytes::Bytes;
use futures::stream::{self, Stream};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{ObjectLocation, ObjectSource, RangeResponse};
use crate::error::{IngestError, IngestResult};

/// Reads an object as a lazy sequence of fixed-size windows
///
/// Each fetch starts right after the previous window's last byte. The reader
/// learns the object length from the first response and stops once a window
/// ends at `total_length - 1`. Only the window being handed downstream is held.
pub struct RangedObjectReader {
    source: Arc<dyn ObjectSource>,
    location: ObjectLocation,
    window_bytes: u64,
    next_start: u64,
    total_length: Option<u64>,
}

impl RangedObjectReader {
    pub fn new(source: Arc<dyn ObjectSource>, location: ObjectLocation, window_bytes: u64) -> Self {
        Self {
            source,
            location,
            window_bytes: window_bytes.max(1),
            next_start: 0,
            total_length: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.total_length, Some(total) if self.next_start >= total)
    }

    /// Fetch the next window
    ///
    /// Returns `Ok(None)` once the object is exhausted.
    pub async fn next_window(&mut self) -> IngestResult<Option<Bytes>> {
        if self.is_complete() {
            return Ok(None);
        }

        let start = self.next_start;
        let end = start + self.window_bytes - 1;
        let response = self.source.fetch_range(&self.location, start, end).await?;
        self.advance(start, &response)?;
        if response.bytes.is_empty() {
            return Ok(None);
        }

        trace!(
            location = %self.location,
            start = response.range_start,
            end = response.range_end,
            total = response.total_length,
            "Fetched object window"
        );

        if self.is_complete() {
            debug!(location = %self.location, total = response.total_length, "Object fully read");
        }

        Ok(Some(response.bytes))
    }

    fn advance(&mut self, requested_start: u64, response: &RangeResponse) -> IngestResult<()> {
        if response.total_length == 0 {
            self.total_length = Some(0);
            return Ok(());
        }

        if response.range_start != requested_start {
            return Err(IngestError::Transfer(format!(
                "Requested range starting at {} but received {}-{} for {}",
                requested_start, response.range_start, response.range_end, self.location
            )));
        }

        let returned = response.range_end - response.range_start + 1;
        if response.bytes.len() as u64 != returned {
            return Err(IngestError::Transfer(format!(
                "Range {}-{} of {} carried {} bytes",
                response.range_start,
                response.range_end,
                self.location,
                response.bytes.len()
            )));
        }

        self.total_length = Some(response.total_length);
        self.next_start = response.range_end + 1;
        Ok(())
    }

    /// Consume the reader into an ordered byte stream
    ///
    /// The first error ends the stream.
    pub fn into_stream(self) -> impl Stream<Item = IngestResult<Bytes>> + Send + 'static {
        stream::try_unfold(self, |mut reader| async move {
            let window = reader.next_window().await?;
            Ok::<_, IngestError>(window.map(|bytes| (bytes, reader)))
        })
    }
}
