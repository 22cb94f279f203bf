//! S3-backed object source

use async_trait::async_trait;
use aws_config::{retry::RetryConfig, BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::Client;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use super::{parse_content_range, ObjectLocation, ObjectSource, RangeResponse};
use crate::config::StorageConfig;
use crate::error::{IngestError, IngestResult};

/// S3 answers a ranged GET on a zero-length object with 416 `InvalidRange`
fn is_empty_object(code: Option<&str>, start: u64) -> bool {
    start == 0 && code == Some("InvalidRange")
}

/// Object source over S3 (or any S3-compatible endpoint)
///
/// Source URLs carry their own region, so one client is built lazily per
/// region and reused.
pub struct S3ObjectSource {
    config: StorageConfig,
    clients: RwLock<HashMap<String, Client>>,
}

impl S3ObjectSource {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
        }
    }

    async fn client(&self, region: &str) -> Client {
        if let Some(client) = self.clients.read().await.get(region) {
            return client.clone();
        }

        let client = self.build_client(region).await;
        self.clients
            .write()
            .await
            .entry(region.to_string())
            .or_insert(client)
            .clone()
    }

    async fn build_client(&self, region: &str) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .retry_config(RetryConfig::standard().with_max_attempts(self.config.max_attempts));

        if let (Some(access_key), Some(secret_key)) =
            (&self.config.access_key, &self.config.secret_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "tally-storage",
            ));
        }

        let shared = loader.load().await;
        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(self.config.path_style);

        if let Some(endpoint) = &self.config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(region = region, endpoint = ?self.config.endpoint, "S3 client initialized");

        Client::from_conf(builder.build())
    }
}

#[async_trait]
impl ObjectSource for S3ObjectSource {
    #[instrument(skip(self), fields(location = %location))]
    async fn fetch_range(
        &self,
        location: &ObjectLocation,
        start: u64,
        end_inclusive: u64,
    ) -> IngestResult<RangeResponse> {
        let result = self
            .client(&location.region)
            .await
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .range(format!("bytes={}-{}", start, end_inclusive))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(SdkError::ServiceError(e)) if is_empty_object(e.err().code(), start) => {
                debug!("Empty object");
                return Ok(RangeResponse::empty());
            }
            Err(e) => {
                return Err(IngestError::Transfer(format!(
                    "Failed to fetch range {}-{}: {}",
                    start,
                    end_inclusive,
                    DisplayErrorContext(&e)
                )))
            }
        };

        let content_range = response
            .content_range()
            .ok_or_else(|| IngestError::Transfer("Missing ContentRange in response".to_string()))?;
        let (range_start, range_end, total_length) = parse_content_range(content_range)?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| IngestError::Transfer(format!("Failed to read response body: {}", e)))?
            .into_bytes();

        debug!(range_start, range_end, total_length, "Fetched range");

        Ok(RangeResponse {
            bytes,
            range_start,
            range_end,
            total_length,
        })
    }

    #[instrument(skip(self), fields(location = %location))]
    async fn exists(&self, location: &ObjectLocation) -> IngestResult<bool> {
        let result = self
            .client(&location.region)
            .await
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            // Missing objects and objects we may not read look the same to callers
            Err(SdkError::ServiceError(e)) => {
                debug!(error = ?e.err(), "Object not readable");
                Ok(false)
            }
            Err(e) => Err(IngestError::Transfer(format!(
                "Failed to check object existence: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }
}
