//! Error types for the similarity index

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Embedding service unreachable or returned an error status
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding provider error: {0}")]
    Embedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Element has nothing to index")]
    EmptyElement,
}

impl IndexError {
    /// Busy databases and transport failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            IndexError::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
