//! Error types for decision fusion

use interaction_ledger::LedgerError;
use similarity_index::IndexError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FusionError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Similarity index error: {0}")]
    Index(#[from] IndexError),

    #[error("No active session")]
    NoActiveSession,
}

impl FusionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FusionError::Ledger(err) => err.is_retryable(),
            FusionError::Index(err) => err.is_retryable(),
            FusionError::NoActiveSession => false,
        }
    }
}

pub type FusionResult<T> = Result<T, FusionError>;
