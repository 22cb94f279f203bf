//! Error types for Tally domain values

use thiserror::Error;

/// Result type alias for Tally domain operations
pub type Result<T> = std::result::Result<T, TallyError>;

/// Domain validation errors
#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Invalid report key '{0}': company and report ids must be non-empty and free of '/'")]
    InvalidReportKey(String),

    #[error("Invalid status '{value}' for {kind}")]
    InvalidStatus { kind: &'static str, value: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TallyError {
    pub fn invalid_status(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidStatus {
            kind,
            value: value.into(),
        }
    }
}
