//! Live execution
//!
//! Drives natural-language steps against a live browser page through the
//! selector engine:
//! - [`StepParser`] turns step text into a [`ParsedAction`]
//! - [`ElementLocator`] runs the element fallback chain
//! - [`LiveExecutor`] retries, asks for corrections and records outcomes
//! - [`ScenarioRecorder`] builds a reusable scenario artifact as steps succeed
//! - [`ScenarioHealer`] replays a finished artifact and revises it on failure
//!
//! The browser and the completion model are seams ([`BrowserSurface`],
//! [`CompletionService`]); this crate ships no driver for either.

pub mod browser;
pub mod completion;
pub mod control;
pub mod errors;
pub mod executor;
pub mod healer;
pub mod hooks;
pub mod locate;
pub mod parser;
pub mod recorder;

pub use browser::{BrowserSurface, Locator, ScrollDirection, Viewport};
pub use completion::{extract_json_object, CompletionService};
pub use control::{ExecutionControl, ExecutionState};
pub use errors::*;
pub use executor::{ExecutionReport, ExecutorConfig, LiveExecutor, StepResult};
pub use healer::{HealAttempt, HealReport, ScenarioHealer, ScenarioRunOutcome, ScenarioRunner};
pub use hooks::{BroadcastHooks, ExecutionEvent, ExecutionHooks, NoopHooks};
pub use locate::{ElementLocator, ElementMatch, ExtractedElement, LocateRequest, LocateStrategy};
pub use parser::{ActionType, ParsedAction, StepParser};
pub use recorder::{
    ArtifactRenderer, OutlineRenderer, PageDefinition, PageField, RecordedStep, Recording,
    ScenarioRecorder,
};
