//! Selector candidate generation
//!
//! Turns an element snapshot into a ranked list of locator candidates:
//! - One evaluator per [`SelectorStrategy`] variant, run in priority order
//! - Uniqueness penalty for text and class selectors on crowded pages
//! - Blending with historical success rates when the caller supplies them
//!
//! Generation is pure and never fails; an empty result means the element is
//! undecidable from the data given.

pub mod classes;
pub mod generator;
pub mod roles;
pub mod strategies;
pub mod types;

pub use classes::semantic_class_tokens;
pub use generator::*;
pub use roles::{accessible_name, detect_role};
pub use types::*;
