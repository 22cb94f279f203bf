//! Server-side error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for ingestion operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// Failures raised by the ingestion pipeline and its stores
///
/// Stream-level variants (`Transfer`, `Decode`) abort the pipeline for the
/// current job. Chunk-level variants are contained by the aggregator.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid source reference: {0}")]
    InvalidSourceReference(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Record write failure: {0}")]
    RecordWrite(String),

    #[error("Cache store error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Domain(#[from] tally_common::TallyError),
}

/// Errors surfaced by the HTTP layer
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            ApiError::Ingest(ref e) => {
                tracing::error!(error = %e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_bad_request() {
        let response = ApiError::Validation("id is required".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::from(IngestError::Queue("closed".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
