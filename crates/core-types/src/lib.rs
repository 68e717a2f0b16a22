//! Shared primitives for the Mender selector engine.
//!
//! Every component speaks in terms of [`ElementDescriptor`] snapshots and the
//! [`Fingerprint`] derived from them, so these types live in one leaf crate.

mod element;
mod fingerprint;

pub use element::{BoundingBox, ElementContext, ElementDescriptor};
pub use fingerprint::{Fingerprint, FINGERPRINT_ATTRIBUTES};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while building core values from external input.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("unknown outcome: {0}")]
    UnknownOutcome(String),

    #[error("invalid element description: {0}")]
    InvalidElement(String),
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct InteractionId(pub String);

impl InteractionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InteractionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of executing one step against one element.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Corrected,
    Skipped,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Corrected => "corrected",
            Outcome::Skipped => "skipped",
            Outcome::Timeout => "timeout",
        }
    }

    /// Corrected outcomes count as successes for statistics.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Corrected)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            "corrected" => Ok(Outcome::Corrected),
            "skipped" => Ok(Outcome::Skipped),
            "timeout" => Ok(Outcome::Timeout),
            other => Err(CoreError::UnknownOutcome(other.to_string())),
        }
    }
}

/// Returns the longest prefix of `value` holding at most `max_chars` characters.
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}
