//! Interaction ledger
//!
//! SQLite-backed record of everything the engine has tried:
//! - Sessions and their per-step interactions (append-only)
//! - Per (fingerprint, selector) statistics, updated atomically on every write
//! - Learned step → correction mappings
//! - Page snapshots captured on failure
//!
//! Aggregated statistics and corrections outlive retention cleanup.

pub mod errors;
pub mod ledger;
pub mod types;
pub mod url_pattern;

pub use errors::*;
pub use ledger::*;
pub use types::*;
pub use url_pattern::page_url_pattern;
