//! Mender command line
//!
//! Exposes modules for integration testing

pub mod cli;
pub mod completion;
pub mod config;

pub use completion::HttpCompletionClient;
pub use config::Config;
