//! Error types for the log cache.

use thiserror::Error;

/// Main error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Push stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("Entry is not a JSON object")]
    NotAnObject,

    #[error("Missing time field: {0}")]
    MissingTimeField(String),

    #[error("Invalid time value in field {field}: {value}")]
    InvalidTime { field: String, value: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cache has shut down")]
    Shutdown,

    #[error("No async runtime available")]
    NoRuntime,
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
