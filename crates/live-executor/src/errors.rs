//! Error types for live execution

use thiserror::Error;

/// Failures reported by a [`BrowserSurface`](crate::browser::BrowserSurface).
#[derive(Debug, Error, Clone)]
pub enum BrowserError {
    #[error("Locator not found: {0}")]
    NotFound(String),

    #[error("Element not visible: {0}")]
    NotVisible(String),

    #[error("Timed out after {timeout_ms}ms waiting for {target}")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),

    #[error("Browser disconnected: {0}")]
    Disconnected(String),

    #[error("Browser error: {0}")]
    Other(String),
}

impl BrowserError {
    /// A lost browser connection will not recover by retrying the step.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BrowserError::Disconnected(_))
    }
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Failures of the completion/vision service. They only ever skip the
/// strategy that asked.
#[derive(Debug, Error, Clone)]
pub enum CompletionError {
    #[error("Completion service unavailable")]
    Unavailable,

    #[error("Completion request failed: {0}")]
    Request(String),

    #[error("Unparsable completion response: {0}")]
    Unparsable(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    /// No strategy in the fallback chain produced a usable element.
    #[error("Could not find element: {0}")]
    Resolution(String),

    #[error("Could not understand step: {0}")]
    UnknownAction(String),

    #[error("No target given for {0} step")]
    MissingTarget(String),

    #[error("An execution is already running")]
    AlreadyRunning,

    #[error("Execution stopped")]
    Stopped,
}

impl ExecutionError {
    /// Whether another attempt at the same step text can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::Browser(err) => err.is_retryable(),
            ExecutionError::Resolution(_) => true,
            ExecutionError::UnknownAction(_)
            | ExecutionError::MissingTarget(_)
            | ExecutionError::AlreadyRunning
            | ExecutionError::Stopped => false,
        }
    }
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;
