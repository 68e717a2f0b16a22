//! Decision fusion
//!
//! [`SelectorEngine`] answers "which selector should this step use" by
//! consulting, in order of trust: learned human corrections, proven selector
//! history, semantically similar elements seen before, and freshly generated
//! candidates. Every recorded outcome flows back into the ledger, the
//! similarity index and the adaptive signal weights.

pub mod config;
pub mod decision;
pub mod engine;
pub mod errors;
pub mod weights;

pub use config::{BlendWeights, DecisionBlend, LearningConfig};
pub use decision::*;
pub use engine::*;
pub use errors::*;
pub use weights::{AdaptiveWeights, WeightKey};
