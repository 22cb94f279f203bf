//! Remote object access
//!
//! [`ObjectSource`] is the boundary to object storage: ranged reads plus an
//! existence check. [`RangedObjectReader`] turns those ranged reads into an
//! ordered byte stream holding at most one window in memory.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{IngestError, IngestResult};

pub mod memory;
pub mod reader;
pub mod s3;

pub use memory::MemoryObjectSource;
pub use reader::RangedObjectReader;
pub use s3::S3ObjectSource;

/// Identity of one object in remote storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub region: String,
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(
        region: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{} ({})", self.bucket, self.key, self.region)
    }
}

/// One ranged read: the bytes plus where they sit in the object
#[derive(Debug, Clone)]
pub struct RangeResponse {
    pub bytes: Bytes,
    pub range_start: u64,
    /// Inclusive offset of the last byte returned
    pub range_end: u64,
    pub total_length: u64,
}

impl RangeResponse {
    /// The response for a zero-length object
    pub fn empty() -> Self {
        Self {
            bytes: Bytes::new(),
            range_start: 0,
            range_end: 0,
            total_length: 0,
        }
    }
}

/// Ranged access to remote objects
///
/// Retries, if any, belong to the implementation's transport client.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Read bytes `start..=end_inclusive`; the response may be shorter at the
    /// end of the object
    async fn fetch_range(
        &self,
        location: &ObjectLocation,
        start: u64,
        end_inclusive: u64,
    ) -> IngestResult<RangeResponse>;

    async fn exists(&self, location: &ObjectLocation) -> IngestResult<bool>;
}

/// Parse an object URL such as `https://s3.eu-west-1.amazonaws.com/bucket/dir/file.csv`
///
/// The region is the second dot-separated label of the host; the first path
/// segment is the bucket and the remainder is the key. Anything else yields
/// `None`.
pub fn parse_source_url(raw: &str) -> Option<ObjectLocation> {
    let url = url::Url::parse(raw).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    let region = url.host_str()?.split('.').nth(1)?;
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let bucket = segments.next()?;
    let key = segments.collect::<Vec<_>>().join("/");

    if region.is_empty() || key.is_empty() {
        return None;
    }

    Some(ObjectLocation::new(region, bucket, key))
}

/// Parse a `Content-Range` header value: `bytes <start>-<end>/<total>`
pub fn parse_content_range(value: &str) -> IngestResult<(u64, u64, u64)> {
    let invalid = || IngestError::Transfer(format!("Malformed Content-Range '{}'", value));

    let rest = value.trim().strip_prefix("bytes ").ok_or_else(invalid)?;
    let (range, total) = rest.split_once('/').ok_or_else(invalid)?;
    let (start, end) = range.split_once('-').ok_or_else(invalid)?;

    let start = start.parse().map_err(|_| invalid())?;
    let end = end.parse().map_err(|_| invalid())?;
    let total = total.parse().map_err(|_| invalid())?;

    if end < start || end >= total {
        return Err(invalid());
    }

    Ok((start, end, total))
}
