//! Error types for Recall

use std::time::Duration;

use thiserror::Error;

use crate::consolidation::SummarizerError;
use crate::embedding::EmbeddingError;

/// Main error type for Recall operations
#[derive(Error, Debug)]
pub enum RecallError {
    /// A vector did not match the dimensionality of the index
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The injected embedding dependency failed
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The injected summarization dependency failed
    #[error("Summarization failed: {0}")]
    SummarizationFailed(String),

    /// A per-conversation lock could not be acquired within the configured wait
    #[error("Timed out after {waited:?} waiting for conversation lock '{key}'")]
    LockTimeout { key: String, waited: Duration },

    /// Storage-related errors (index file, fact file, checkpoints)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied an unusable value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RecallError {
    /// Whether the caller may reasonably retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RecallError::LockTimeout { .. }
                | RecallError::EmbeddingUnavailable(_)
                | RecallError::SummarizationFailed(_)
        )
    }
}

impl From<EmbeddingError> for RecallError {
    fn from(err: EmbeddingError) -> Self {
        RecallError::EmbeddingUnavailable(err.to_string())
    }
}

impl From<SummarizerError> for RecallError {
    fn from(err: SummarizerError) -> Self {
        RecallError::SummarizationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for RecallError {
    fn from(err: serde_json::Error) -> Self {
        RecallError::Serialization(err.to_string())
    }
}

/// Result type alias for Recall operations
pub type Result<T> = std::result::Result<T, RecallError>;
