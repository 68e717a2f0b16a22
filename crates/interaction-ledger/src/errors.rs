//! Error types for the interaction ledger

use thiserror::Error;

/// Ledger error enumeration
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Underlying SQLite failure
    #[error("Storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Database directory could not be created
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON column could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record rejected before reaching storage
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Lookup by id found nothing
    #[error("Not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    /// Check if error is retryable (database busy or locked by another writer)
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Result alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
