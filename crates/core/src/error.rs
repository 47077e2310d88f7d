//! Error types for newsrag.
//!
//! A single error enum covers every failure category in the workspace:
//! configuration, I/O, the record store, the vector index and the
//! embedding provider.

use thiserror::Error;

/// Unified error type for newsrag.
///
/// All fallible functions return `Result<T, AppError>`.
/// We never panic: errors are represented and propagated.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record store errors (constraint violations, unexpected SQL failures).
    ///
    /// Never retried automatically.
    #[error("Store error: {0}")]
    Store(String),

    /// The on-disk vector index or its position mapping is missing,
    /// unreadable, or out of step with each other.
    ///
    /// Recovered by a full rebuild from the record store.
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// Embedding provider failures
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Whether a full index rebuild is the expected recovery for this error.
    pub fn is_index_unavailable(&self) -> bool {
        matches!(self, AppError::IndexUnavailable(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Store(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
