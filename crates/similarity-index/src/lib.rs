//! Semantic similarity index
//!
//! Remembers every element the engine has resolved as an embedded textual
//! description plus the selector that worked for it. Queries answer "have we
//! seen something like this before", while per-entry success and failure
//! counters answer "did using it work", so look-alikes with a poor track
//! record rank below reliable ones.

pub mod description;
pub mod embedding;
pub mod errors;
pub mod index;

pub use description::describe_element;
pub use embedding::{
    cosine_similarity, EmbeddingProvider, HashEmbeddingProvider, HttpEmbeddingConfig,
    HttpEmbeddingProvider, DEFAULT_DIMENSION,
};
pub use errors::*;
pub use index::*;
