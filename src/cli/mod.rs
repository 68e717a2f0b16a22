pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod decide;
pub mod dispatch;
pub mod element;
pub mod env;
pub mod inspect;
pub mod learning;
pub mod output;
pub mod parse;
pub mod runtime;

pub use app::run;
pub use commands::Commands;
pub use env::CliArgs;
