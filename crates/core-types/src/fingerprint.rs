use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{truncate_chars, ElementDescriptor};

/// Attributes that contribute to an element's identity, in hashing order.
pub const FINGERPRINT_ATTRIBUTES: [&str; 6] = [
    "data-testid",
    "data-test-id",
    "data-test",
    "id",
    "name",
    "aria-label",
];

const TEXT_PREFIX_CHARS: usize = 50;
const FINGERPRINT_HEX_LEN: usize = 12;

/// Stable identity of a logical UI element across page loads.
///
/// Derived from the tag, the first 50 characters of visible text and the
/// [`FINGERPRINT_ATTRIBUTES`]. Anything else (generated classes, styles,
/// positions) is ignored.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(element: &ElementDescriptor) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(element.tag_name.trim().to_ascii_lowercase().as_bytes());
        hasher.update(b"|");
        hasher.update(truncate_chars(element.trimmed_text(), TEXT_PREFIX_CHARS).as_bytes());
        for name in FINGERPRINT_ATTRIBUTES {
            hasher.update(b"|");
            hasher.update(element.attr(name).unwrap_or_default().as_bytes());
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|byte| format!("{:02x}", byte)).collect();
        Self(hex[..FINGERPRINT_HEX_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
