//! Live step executor
//!
//! Runs natural-language steps one at a time against a [`BrowserSurface`]:
//! parse, locate through the fallback chain, act, then feed the outcome back
//! into the selector engine. A step that keeps failing is handed to a human
//! for a replacement step; what the replacement resolved to is learned as a
//! correction for the original text.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_recursion::async_recursion;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use decision_fusion::{SelectorEngine, StepOutcome};
use interaction_ledger::{Interaction, Session};
use mender_core_types::{ElementContext, ElementDescriptor, Outcome, SessionId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::browser::{BrowserSurface, ScrollDirection};
use crate::completion::CompletionService;
use crate::control::{ExecutionControl, ExecutionState};
use crate::errors::{ExecutionError, ExecutionResult};
use crate::hooks::{ExecutionHooks, NoopHooks};
use crate::locate::{ElementLocator, ElementMatch, LocateRequest, DEFAULT_DECISION_THRESHOLD};
use crate::parser::{ActionType, ParsedAction, StepParser, NAVIGATE_BACK, NAVIGATE_FORWARD, NAVIGATE_RELOAD};
use crate::recorder::{ArtifactRenderer, OutlineRenderer, ScenarioRecorder};

const DOM_SNAPSHOT_SCRIPT: &str = "() => document.documentElement ? document.documentElement.outerHTML : ''";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Attempts per step before asking for a correction
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Pause between consecutive steps
    pub step_delay_ms: u64,
    /// Pause after every browser action
    pub settle_delay_ms: u64,
    /// Zero disables correction requests
    pub correction_timeout_secs: u64,
    pub visibility_timeout_ms: u64,
    pub assert_timeout_ms: u64,
    pub screenshot_on_each_step: bool,
    pub fail_fast: bool,
    /// Nesting limit for corrections of corrections
    pub max_correction_depth: u32,
    pub self_heal_budget: u32,
    /// Minimum engine confidence before its selector is tried first
    pub decision_threshold: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 500,
            step_delay_ms: 0,
            settle_delay_ms: 300,
            correction_timeout_secs: 30,
            visibility_timeout_ms: 10_000,
            assert_timeout_ms: 5_000,
            screenshot_on_each_step: true,
            fail_fast: false,
            max_correction_depth: 3,
            self_heal_budget: 20,
            decision_threshold: DEFAULT_DECISION_THRESHOLD,
        }
    }
}

/// What happened to one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub step_text: String,
    pub success: bool,
    pub action: Option<ParsedAction>,
    pub element: Option<ElementMatch>,
    pub error: Option<String>,
    pub screenshot_base64: Option<String>,
    pub duration_ms: u64,
    pub retries: u32,
    pub user_correction: Option<String>,
    pub outcome: Outcome,
}

impl StepResult {
    fn failed(step_index: usize, step_text: &str, error: String, duration_ms: u64) -> Self {
        Self {
            step_index,
            step_text: step_text.to_string(),
            success: false,
            action: None,
            element: None,
            error: Some(error),
            screenshot_base64: None,
            duration_ms,
            retries: 0,
            user_correction: None,
            outcome: Outcome::Failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub session_id: SessionId,
    pub final_state: ExecutionState,
    pub results: Vec<StepResult>,
    pub artifact: String,
    /// The finished session as stored, when the engine could close it
    pub session: Option<Session>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> bool {
        self.final_state == ExecutionState::Completed
    }
}

/// The element a step acted on and the page it was on.
struct Located {
    found: ElementMatch,
    context: ElementContext,
}

struct Performed {
    located: Option<Located>,
    screenshot: Option<String>,
}

/// A finished step plus the element context the caller may need to record a
/// correction.
struct StepRun {
    result: StepResult,
    context: Option<ElementContext>,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct LiveExecutor {
    browser: Arc<dyn BrowserSurface>,
    engine: Arc<SelectorEngine>,
    parser: StepParser,
    locator: ElementLocator,
    config: ExecutorConfig,
    control: ExecutionControl,
    hooks: Arc<dyn ExecutionHooks>,
    renderer: Arc<dyn ArtifactRenderer>,
    recorder: Mutex<ScenarioRecorder>,
    running: AtomicBool,
}

impl LiveExecutor {
    pub fn new(
        browser: Arc<dyn BrowserSurface>,
        engine: Arc<SelectorEngine>,
        config: ExecutorConfig,
    ) -> Self {
        let locator = ElementLocator::new(browser.clone(), engine.clone())
            .with_decision_threshold(config.decision_threshold);
        Self {
            browser,
            engine,
            parser: StepParser::new(),
            locator,
            config,
            control: ExecutionControl::new(),
            hooks: Arc::new(NoopHooks),
            renderer: Arc::new(OutlineRenderer),
            recorder: Mutex::new(ScenarioRecorder::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Enables the parse fallback and the vision and DOM locate strategies.
    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.parser = self.parser.with_completion(completion.clone());
        self.locator = self.locator.with_completion(completion);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ArtifactRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_scenario_names(
        self,
        feature_name: impl Into<String>,
        scenario_name: impl Into<String>,
    ) -> Self {
        *self.recorder.lock() = ScenarioRecorder::with_names(feature_name, scenario_name);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn control(&self) -> ExecutionControl {
        self.control.clone()
    }

    pub fn state(&self) -> ExecutionState {
        self.control.state()
    }

    /// Artifact rendered from what has been recorded so far.
    pub fn current_artifact(&self) -> String {
        self.recorder.lock().render(self.renderer.as_ref())
    }

    pub fn recording(&self) -> crate::recorder::Recording {
        self.recorder.lock().recording()
    }

    /// Execute `steps` in order, optionally navigating to `target_url` first.
    ///
    /// Step failures are reported in the returned [`ExecutionReport`]; only a
    /// second concurrent run is an error. A stop or pause issued on the
    /// control handle before the run starts takes effect in this run.
    pub async fn run(
        &self,
        steps: &[String],
        target_url: Option<&str>,
    ) -> ExecutionResult<ExecutionReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ExecutionError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);

        self.recorder.lock().clear();
        self.set_state(ExecutionState::Running);

        let start_url = target_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(normalize_url);
        let session_id = self
            .engine
            .start_session(start_url.as_deref().unwrap_or_default(), steps.to_vec());
        info!(session_id = %session_id, steps = steps.len(), "Live execution started");

        let mut results = Vec::with_capacity(steps.len());
        let mut healthy = true;

        if let Some(url) = start_url.as_ref().filter(|_| !self.control.is_stopped()) {
            match self.browser.navigate(url).await {
                Ok(()) => {
                    let action = ParsedAction::new(ActionType::Navigate, format!("navigate to {}", url))
                        .with_value(url.as_str());
                    self.recorder.lock().record_action(&action);
                }
                Err(err) => {
                    error!(error = %err, url = %url, "Initial navigation failed");
                    healthy = false;
                }
            }
        }

        if healthy {
            for (index, step) in steps.iter().enumerate() {
                if index > 0 && self.config.step_delay_ms > 0 {
                    self.control
                        .sleep_unless_stopped(Duration::from_millis(self.config.step_delay_ms))
                        .await;
                }
                if !self.pause_gate().await {
                    info!(step_index = index, "Execution stopped before step");
                    break;
                }

                let started = Instant::now();
                let result = match self.execute_step(index, step, 0).await {
                    Ok(run) => run.result,
                    Err(ExecutionError::Stopped) => {
                        info!(step_index = index, "Execution stopped during step");
                        results.push(StepResult::failed(
                            index,
                            step,
                            ExecutionError::Stopped.to_string(),
                            elapsed_ms(started),
                        ));
                        break;
                    }
                    Err(err) => {
                        error!(step_index = index, error = %err, "Aborting execution");
                        let result =
                            StepResult::failed(index, step, err.to_string(), elapsed_ms(started));
                        self.hooks.on_step_complete(&result);
                        results.push(result);
                        break;
                    }
                };

                self.hooks.on_step_complete(&result);
                let failed = !result.success;
                results.push(result);
                if failed && self.config.fail_fast {
                    warn!(step_index = index, "Fail-fast: stopping after failed step");
                    break;
                }
            }
        }

        let completed = healthy
            && results.len() == steps.len()
            && results.iter().all(|r| r.success)
            && !self.control.is_stopped();
        let final_state = if completed {
            ExecutionState::Completed
        } else {
            ExecutionState::Failed
        };

        self.control.finish_run().await;

        let artifact = self.current_artifact();
        self.hooks.on_artifact_generated(&artifact);
        let session = match self.engine.end_session(Some(artifact.clone())) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(error = %err, "Failed to close session");
                None
            }
        };
        self.set_state(final_state);
        info!(
            session_id = %session_id,
            state = %final_state,
            steps_run = results.len(),
            "Live execution finished"
        );

        Ok(ExecutionReport {
            session_id,
            final_state,
            results,
            artifact,
            session,
        })
    }

    fn set_state(&self, state: ExecutionState) {
        let previous = self.control.set_state(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Execution state changed");
            self.hooks.on_state_change(state);
        }
    }

    /// Hold while paused; `false` once stopped.
    async fn pause_gate(&self) -> bool {
        if self.control.is_stopped() {
            return false;
        }
        if !self.control.is_paused() {
            return true;
        }
        self.set_state(ExecutionState::Paused);
        let proceed = self.control.wait_while_paused().await;
        if proceed {
            self.set_state(ExecutionState::Running);
        }
        proceed
    }

    #[async_recursion]
    async fn execute_step(&self, index: usize, step: &str, depth: u32) -> ExecutionResult<StepRun> {
        let started = Instant::now();
        let action = self.parser.parse(step).await;
        debug!(step_index = index, step, action = %action.action_type, depth, "Executing step");

        let attempts = self.config.max_retries.max(1);
        let mut retries = 0u32;
        let mut last_located: Option<Located> = None;
        let last_error = loop {
            if self.control.is_stopped() {
                return Err(ExecutionError::Stopped);
            }
            match self.perform(index, &action, &mut last_located).await {
                Ok(performed) => {
                    let run = self
                        .finish_success(index, step, action, performed, retries, depth, started)
                        .await;
                    return Ok(run);
                }
                Err(err @ ExecutionError::Stopped) => return Err(err),
                Err(ExecutionError::Browser(err)) if !err.is_retryable() => {
                    return Err(ExecutionError::Browser(err));
                }
                Err(err) => {
                    if !err.is_retryable() || retries + 1 >= attempts {
                        break err;
                    }
                    retries += 1;
                    warn!(
                        step_index = index,
                        attempt = retries,
                        error = %err,
                        "Step attempt failed; retrying"
                    );
                    let backoff = Duration::from_millis(self.config.retry_backoff_ms);
                    if !self.control.sleep_unless_stopped(backoff).await {
                        return Err(ExecutionError::Stopped);
                    }
                }
            }
        };
        let mut error_text = last_error.to_string();

        if let Some(correction) = self.request_correction(index, step, &error_text, depth).await? {
            info!(step_index = index, correction = %correction, "Executing corrected step");
            let corrected = self.execute_step(index, &correction, depth + 1).await?;
            if corrected.result.success {
                let result = self
                    .finish_corrected(step, &action, corrected, &correction, retries, started)
                    .await;
                return Ok(StepRun {
                    context: result.context,
                    result: StepResult {
                        step_index: index,
                        ..result.result
                    },
                });
            }
            error_text = corrected
                .result
                .error
                .unwrap_or_else(|| format!("Correction failed: {}", correction));
        }

        self.record_failure(index, &action, last_located.as_ref(), &error_text, retries, started)
            .await;
        Ok(StepRun {
            result: StepResult {
                step_index: index,
                step_text: step.to_string(),
                success: false,
                action: Some(action),
                element: last_located.map(|l| l.found),
                error: Some(error_text),
                screenshot_base64: None,
                duration_ms: elapsed_ms(started),
                retries,
                user_correction: None,
                outcome: Outcome::Failure,
            },
            context: None,
        })
    }

    /// Ask for a replacement step. `Err(Stopped)` if the run is stopped while
    /// waiting.
    async fn request_correction(
        &self,
        index: usize,
        step: &str,
        error_text: &str,
        depth: u32,
    ) -> ExecutionResult<Option<String>> {
        if self.config.correction_timeout_secs == 0 || depth >= self.config.max_correction_depth {
            return Ok(None);
        }
        self.set_state(ExecutionState::WaitingForCorrection);
        self.hooks.on_correction_requested(index, step, error_text);
        info!(step_index = index, step, error = error_text, "Waiting for correction");

        let timeout = Duration::from_secs(self.config.correction_timeout_secs);
        let correction = self.control.wait_for_correction(timeout).await;
        if self.control.is_stopped() {
            return Err(ExecutionError::Stopped);
        }
        self.set_state(ExecutionState::Running);
        self.control.discard_corrections().await;
        if correction.is_none() {
            warn!(step_index = index, "No correction received");
        }
        Ok(correction)
    }

    async fn perform(
        &self,
        index: usize,
        action: &ParsedAction,
        last_located: &mut Option<Located>,
    ) -> ExecutionResult<Performed> {
        if action.action_type == ActionType::Unknown {
            return Err(ExecutionError::UnknownAction(action.raw_step.clone()));
        }

        let located = match action.element_target() {
            Some(target) => {
                let page_url = self.browser.current_url().await?;
                let page_title = self.browser.title().await.unwrap_or_default();
                let found = self
                    .locator
                    .locate(&LocateRequest {
                        target,
                        step_text: &action.raw_step,
                        page_url: &page_url,
                        page_title: &page_title,
                    })
                    .await?;
                let context = ElementContext::new(found.element.clone(), page_url, page_title);
                *last_located = Some(Located {
                    found: found.clone(),
                    context: context.clone(),
                });
                Some(Located { found, context })
            }
            None => None,
        };
        let locator = located.as_ref().map(|l| &l.found.locator);
        let missing = || ExecutionError::MissingTarget(action.action_type.to_string());

        let mut screenshot = None;
        match action.action_type {
            ActionType::Navigate => match action.value.as_deref().map(str::trim) {
                Some(NAVIGATE_BACK) => self.browser.go_back().await?,
                Some(NAVIGATE_FORWARD) => self.browser.go_forward().await?,
                Some(NAVIGATE_RELOAD) => self.browser.reload().await?,
                Some(url) if !url.is_empty() => self.browser.navigate(&normalize_url(url)).await?,
                _ => return Err(missing()),
            },
            ActionType::Click => self.browser.click(locator.ok_or_else(missing)?).await?,
            ActionType::Fill => {
                let value = action.value.as_deref().unwrap_or_default();
                self.browser.fill(locator.ok_or_else(missing)?, value).await?
            }
            ActionType::Select => {
                let value = action.value.as_deref().ok_or_else(missing)?;
                self.browser
                    .select_option(locator.ok_or_else(missing)?, value)
                    .await?
            }
            ActionType::Check => self.browser.check(locator.ok_or_else(missing)?).await?,
            ActionType::Uncheck => self.browser.uncheck(locator.ok_or_else(missing)?).await?,
            ActionType::Hover => self.browser.hover(locator.ok_or_else(missing)?).await?,
            ActionType::Press => {
                let key = action.value.as_deref().unwrap_or("Enter");
                self.browser.press_key(key).await?
            }
            ActionType::Wait => match action.wait_seconds() {
                Some(seconds) => {
                    if !self
                        .control
                        .sleep_unless_stopped(Duration::from_secs(seconds))
                        .await
                    {
                        return Err(ExecutionError::Stopped);
                    }
                }
                None => {
                    let timeout = Duration::from_millis(self.config.visibility_timeout_ms);
                    self.browser
                        .wait_visible(locator.ok_or_else(missing)?, timeout)
                        .await?
                }
            },
            ActionType::Assert => {
                let timeout = Duration::from_millis(self.config.assert_timeout_ms);
                self.browser
                    .wait_visible(locator.ok_or_else(missing)?, timeout)
                    .await?
            }
            ActionType::Scroll => {
                let direction = action.scroll_direction().unwrap_or(ScrollDirection::Down);
                self.browser.scroll(direction).await?
            }
            ActionType::Screenshot => {
                let encoded = BASE64.encode(self.browser.screenshot().await?);
                self.hooks.on_screenshot(index, &encoded);
                screenshot = Some(encoded);
            }
            ActionType::Unknown => {
                return Err(ExecutionError::UnknownAction(action.raw_step.clone()))
            }
        }

        let settle = Duration::from_millis(self.config.settle_delay_ms);
        if !self.control.sleep_unless_stopped(settle).await {
            return Err(ExecutionError::Stopped);
        }

        if screenshot.is_none() && self.config.screenshot_on_each_step {
            screenshot = self.capture_screenshot().await;
            if let Some(encoded) = &screenshot {
                self.hooks.on_screenshot(index, encoded);
            }
        }

        Ok(Performed { located, screenshot })
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish_success(
        &self,
        index: usize,
        step: &str,
        action: ParsedAction,
        performed: Performed,
        retries: u32,
        depth: u32,
        started: Instant,
    ) -> StepRun {
        let duration_ms = elapsed_ms(started);
        match &performed.located {
            Some(located) if depth == 0 => {
                let outcome = step_outcome(&located.found, step, &action, duration_ms, retries);
                let stored = self.engine.record_success(&located.context, outcome).await;
                self.append_recorded(stored);
            }
            Some(_) => {}
            None => self.record_action(&action),
        }
        info!(step_index = index, action = %action.action_type, retries, "Step succeeded");

        StepRun {
            context: performed.located.as_ref().map(|l| l.context.clone()),
            result: StepResult {
                step_index: index,
                step_text: step.to_string(),
                success: true,
                action: Some(action),
                element: performed.located.map(|l| l.found),
                error: None,
                screenshot_base64: performed.screenshot,
                duration_ms,
                retries,
                user_correction: None,
                outcome: Outcome::Success,
            },
        }
    }

    /// Learn the selector the correction resolved to for the original step.
    async fn finish_corrected(
        &self,
        original_step: &str,
        original_action: &ParsedAction,
        corrected: StepRun,
        correction: &str,
        retries: u32,
        started: Instant,
    ) -> StepRun {
        let duration_ms = elapsed_ms(started);
        let StepRun { result, context } = corrected;
        match (&result.element, &context) {
            (Some(found), Some(context)) => {
                let action = result.action.as_ref().unwrap_or(original_action);
                let outcome = step_outcome(found, original_step, action, duration_ms, retries);
                let stored = self
                    .engine
                    .record_correction(context, outcome, correction)
                    .await;
                self.append_recorded(stored);
            }
            _ => debug!(
                step = original_step,
                correction, "Correction touched no element; nothing to learn"
            ),
        }

        StepRun {
            context,
            result: StepResult {
                step_text: original_step.to_string(),
                success: true,
                duration_ms,
                retries,
                user_correction: Some(correction.to_string()),
                outcome: Outcome::Corrected,
                ..result
            },
        }
    }

    async fn record_failure(
        &self,
        index: usize,
        action: &ParsedAction,
        located: Option<&Located>,
        error_text: &str,
        retries: u32,
        started: Instant,
    ) {
        let duration_ms = elapsed_ms(started);
        let page_url = self.browser.current_url().await.unwrap_or_default();
        let (context, outcome) = match located {
            Some(located) => (
                located.context.clone(),
                step_outcome(&located.found, &action.raw_step, action, duration_ms, retries),
            ),
            None => {
                let target = ElementDescriptor::default()
                    .with_text(action.element_target().unwrap_or_default());
                let title = self.browser.title().await.unwrap_or_default();
                (
                    ElementContext::new(target, page_url.clone(), title),
                    StepOutcome::new("", action.raw_step.clone())
                        .with_action(action.action_type.as_str(), action.value.clone())
                        .with_duration(duration_ms)
                        .with_retries(retries),
                )
            }
        };
        if let Err(err) = self
            .engine
            .record_failure(&context, outcome, error_text)
            .await
        {
            warn!(error = %err, "Failed to record step failure");
        }

        let dom = match self.browser.evaluate(DOM_SNAPSHOT_SCRIPT).await {
            Ok(serde_json::Value::String(html)) => html,
            Ok(_) => String::new(),
            Err(err) => {
                debug!(error = %err, "DOM snapshot unavailable");
                String::new()
            }
        };
        let screenshot = self.capture_screenshot().await;
        if let Err(err) = self
            .engine
            .save_page_snapshot(index, &page_url, dom, screenshot)
        {
            warn!(error = %err, step_index = index, "Failed to save page snapshot");
        }
    }

    fn append_recorded(&self, stored: decision_fusion::FusionResult<Interaction>) {
        match stored {
            Ok(interaction) => {
                let artifact = {
                    let mut recorder = self.recorder.lock();
                    recorder.record_interaction(&interaction);
                    recorder.render(self.renderer.as_ref())
                };
                self.hooks.on_artifact_generated(&artifact);
            }
            Err(err) => warn!(error = %err, "Failed to record interaction"),
        }
    }

    fn record_action(&self, action: &ParsedAction) {
        let artifact = {
            let mut recorder = self.recorder.lock();
            recorder.record_action(action);
            recorder.render(self.renderer.as_ref())
        };
        self.hooks.on_artifact_generated(&artifact);
    }

    async fn capture_screenshot(&self) -> Option<String> {
        match self.browser.screenshot().await {
            Ok(bytes) => Some(BASE64.encode(bytes)),
            Err(err) => {
                debug!(error = %err, "Screenshot failed");
                None
            }
        }
    }
}

fn step_outcome(
    found: &ElementMatch,
    step_text: &str,
    action: &ParsedAction,
    duration_ms: u64,
    retries: u32,
) -> StepOutcome {
    let mut outcome = StepOutcome::new(found.selector.clone(), step_text)
        .with_strategy(found.strategy.clone())
        .with_action(action.action_type.as_str(), action.value.clone())
        .with_duration(duration_ms)
        .with_retries(retries)
        .with_selectors_tried(found.selectors_tried.clone())
        .with_confidence(found.confidence);
    if let Some(source) = found.source {
        outcome = outcome.with_source(source);
    }
    outcome
}

/// Prefix `https://` when the URL has no scheme.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains("://") {
        return raw.to_string();
    }
    let candidate = format!("https://{}", raw);
    match Url::parse(&candidate) {
        Ok(url) => url.to_string(),
        Err(_) => candidate,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
