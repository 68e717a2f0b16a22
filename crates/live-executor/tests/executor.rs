use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use decision_fusion::{DecisionSource, LearningConfig, SelectorEngine};
use interaction_ledger::InteractionLedger;
use live_executor::{
    BrowserError, BrowserResult, BrowserSurface, ExecutionControl, ExecutionError,
    ExecutionHooks, ExecutionState, ExecutorConfig, LiveExecutor, LocateStrategy, Locator,
    ScrollDirection, StepResult, Viewport,
};
use mender_core_types::{BoundingBox, Outcome};
use parking_lot::Mutex;
use similarity_index::{HashEmbeddingProvider, SimilarityIndex};

const LOGIN_URL: &str = "https://example.com/login";

/// Page whose elements are addressed by their selector string.
#[derive(Default)]
struct MockBrowser {
    elements: Mutex<HashMap<String, String>>,
    actions: Mutex<Vec<String>>,
    url: Mutex<String>,
}

impl MockBrowser {
    fn with_elements(elements: &[(Locator, &str)]) -> Arc<Self> {
        let browser = Self::default();
        {
            let mut map = browser.elements.lock();
            for (locator, text) in elements {
                map.insert(locator.to_string(), text.to_string());
            }
        }
        Arc::new(browser)
    }

    fn actions(&self) -> Vec<String> {
        self.actions.lock().clone()
    }

    fn log(&self, action: String) {
        self.actions.lock().push(action);
    }

    fn require(&self, locator: &Locator) -> BrowserResult<()> {
        if self.elements.lock().contains_key(&locator.to_string()) {
            Ok(())
        } else {
            Err(BrowserError::NotFound(locator.to_string()))
        }
    }
}

#[async_trait]
impl BrowserSurface for MockBrowser {
    async fn navigate(&self, url: &str) -> BrowserResult<()> {
        *self.url.lock() = url.to_string();
        self.log(format!("navigate {}", url));
        Ok(())
    }

    async fn go_back(&self) -> BrowserResult<()> {
        self.log("back".into());
        Ok(())
    }

    async fn go_forward(&self) -> BrowserResult<()> {
        self.log("forward".into());
        Ok(())
    }

    async fn reload(&self) -> BrowserResult<()> {
        self.log("reload".into());
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.url.lock().clone())
    }

    async fn title(&self) -> BrowserResult<String> {
        Ok("Example".into())
    }

    fn viewport(&self) -> Viewport {
        Viewport::default()
    }

    async fn count(&self, locator: &Locator) -> BrowserResult<usize> {
        Ok(usize::from(self.elements.lock().contains_key(&locator.to_string())))
    }

    async fn is_visible(&self, locator: &Locator) -> BrowserResult<bool> {
        Ok(self.elements.lock().contains_key(&locator.to_string()))
    }

    async fn bounding_box(&self, locator: &Locator) -> BrowserResult<Option<BoundingBox>> {
        self.require(locator)?;
        Ok(Some(BoundingBox::new(10.0, 20.0, 100.0, 30.0)))
    }

    async fn text_content(&self, locator: &Locator) -> BrowserResult<Option<String>> {
        Ok(self.elements.lock().get(&locator.to_string()).cloned())
    }

    async fn click(&self, locator: &Locator) -> BrowserResult<()> {
        self.require(locator)?;
        self.log(format!("click {}", locator));
        Ok(())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> BrowserResult<()> {
        self.require(locator)?;
        self.log(format!("fill {} {}", locator, value));
        Ok(())
    }

    async fn select_option(&self, locator: &Locator, label: &str) -> BrowserResult<()> {
        self.require(locator)?;
        self.log(format!("select {} {}", locator, label));
        Ok(())
    }

    async fn check(&self, locator: &Locator) -> BrowserResult<()> {
        self.require(locator)?;
        self.log(format!("check {}", locator));
        Ok(())
    }

    async fn uncheck(&self, locator: &Locator) -> BrowserResult<()> {
        self.require(locator)?;
        self.log(format!("uncheck {}", locator));
        Ok(())
    }

    async fn hover(&self, locator: &Locator) -> BrowserResult<()> {
        self.require(locator)?;
        self.log(format!("hover {}", locator));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> BrowserResult<()> {
        self.log(format!("press {}", key));
        Ok(())
    }

    async fn scroll(&self, direction: ScrollDirection) -> BrowserResult<()> {
        self.log(format!("scroll {}", direction.as_str()));
        Ok(())
    }

    async fn wait_visible(&self, locator: &Locator, _timeout: Duration) -> BrowserResult<()> {
        self.require(locator)
    }

    async fn screenshot(&self) -> BrowserResult<Vec<u8>> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }

    async fn evaluate(&self, script: &str) -> BrowserResult<serde_json::Value> {
        if script.contains("outerHTML") {
            Ok(serde_json::Value::String("<html><body>login</body></html>".into()))
        } else {
            Ok(serde_json::Value::Null)
        }
    }
}

struct Stores {
    ledger: Arc<InteractionLedger>,
    index: Arc<SimilarityIndex>,
}

impl Stores {
    fn new() -> Self {
        Self {
            ledger: Arc::new(InteractionLedger::in_memory().unwrap()),
            index: Arc::new(
                SimilarityIndex::in_memory(Arc::new(HashEmbeddingProvider::default())).unwrap(),
            ),
        }
    }

    fn engine(&self, config: LearningConfig) -> Arc<SelectorEngine> {
        Arc::new(SelectorEngine::new(
            self.ledger.clone(),
            self.index.clone(),
            config,
        ))
    }
}

fn fast_config() -> ExecutorConfig {
    ExecutorConfig {
        retry_backoff_ms: 0,
        settle_delay_ms: 0,
        correction_timeout_secs: 0,
        ..Default::default()
    }
}

fn login_page() -> Arc<MockBrowser> {
    MockBrowser::with_elements(&[
        (Locator::role("button", "Sign In"), "Sign In"),
        (
            Locator::Placeholder {
                text: "Email".into(),
            },
            "",
        ),
    ])
}

fn steps(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn wait_for_state(control: &ExecutionControl, state: ExecutionState) {
    let mut rx = control.subscribe_state();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
        .await
        .expect("state reached in time")
        .unwrap();
}

#[tokio::test]
async fn test_runs_steps_and_records_scenario() {
    let stores = Stores::new();
    let browser = login_page();
    let executor = LiveExecutor::new(
        browser.clone(),
        stores.engine(LearningConfig::default()),
        fast_config(),
    )
    .with_scenario_names("Login", "Sign in with email");

    let report = executor
        .run(
            &steps(&[
                "Fill the Email with \"jane@example.com\"",
                "click the Sign In button",
                "press Enter",
            ]),
            Some("example.com/login"),
        )
        .await
        .unwrap();

    assert_eq!(report.final_state, ExecutionState::Completed);
    assert!(report.succeeded());
    assert_eq!(report.results.len(), 3);
    assert!(report.results.iter().all(|r| r.outcome == Outcome::Success));
    assert!(report.results[0].screenshot_base64.is_some());
    assert_eq!(
        browser.actions(),
        vec![
            format!("navigate {}", LOGIN_URL),
            "fill placeholder=\"Email\" jane@example.com".to_string(),
            "click role=button[name=\"Sign In\"]".to_string(),
            "press Enter".to_string(),
        ]
    );

    let element = report.results[1].element.as_ref().unwrap();
    assert_eq!(element.via, LocateStrategy::Decision);
    assert_eq!(element.source, Some(DecisionSource::Generated));
    assert_eq!(element.strategy, "role_name");
    assert_eq!(element.element.tag_name, "button");

    let artifact = &report.artifact;
    assert!(artifact.starts_with("Feature \"Login\""));
    assert!(artifact.contains(&format!("navigate to \"{}\"", LOGIN_URL)));
    assert!(artifact.contains("fill LoginPage.emailInput with \"jane@example.com\""));
    assert!(artifact.contains("click LoginPage.signInButton"));
    assert!(artifact.contains("press \"Enter\""));
    assert_eq!(executor.current_artifact(), report.artifact);

    let session = report.session.unwrap();
    assert_eq!(session.successful_steps, 2);
    assert_eq!(session.artifact.as_deref(), Some(report.artifact.as_str()));
    assert_eq!(executor.state(), ExecutionState::Completed);
}

#[tokio::test]
async fn test_correction_is_learned_and_reused() {
    let stores = Stores::new();
    let browser = login_page();
    let config = ExecutorConfig {
        correction_timeout_secs: 5,
        ..fast_config()
    };
    let executor = LiveExecutor::new(
        browser.clone(),
        stores.engine(LearningConfig::default()),
        config,
    );

    let control = executor.control();
    let helper = tokio::spawn(async move {
        wait_for_state(&control, ExecutionState::WaitingForCorrection).await;
        control.provide_correction("click the Sign In button");
    });

    let report = executor
        .run(&steps(&["click the login button"]), Some(LOGIN_URL))
        .await
        .unwrap();
    helper.await.unwrap();

    assert_eq!(report.final_state, ExecutionState::Completed);
    let result = &report.results[0];
    assert!(result.success);
    assert_eq!(result.outcome, Outcome::Corrected);
    assert_eq!(result.retries, 2);
    assert_eq!(result.step_text, "click the login button");
    assert_eq!(result.user_correction.as_deref(), Some("click the Sign In button"));
    assert_eq!(report.session.unwrap().corrected_steps, 1);

    let mapping = stores
        .ledger
        .find_correction("click the login button", Some(LOGIN_URL))
        .unwrap()
        .unwrap();
    assert_eq!(mapping.corrected_selector, "role=button[name=\"Sign In\"]");
    assert_eq!(mapping.times_applied, 1);
    assert!(report.artifact.contains("click LoginPage.signInButton"));

    // A second run trusts the mapping straight away.
    let learning = LearningConfig {
        correction_min_applications: 1,
        ..Default::default()
    };
    let rerun = LiveExecutor::new(browser.clone(), stores.engine(learning), fast_config());
    let report = rerun
        .run(&steps(&["click the login button"]), Some(LOGIN_URL))
        .await
        .unwrap();

    assert_eq!(report.final_state, ExecutionState::Completed);
    let result = &report.results[0];
    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.retries, 0);
    let element = result.element.as_ref().unwrap();
    assert_eq!(element.via, LocateStrategy::Decision);
    assert_eq!(element.source, Some(DecisionSource::LearnedCorrection));
    assert_eq!(element.selector, "role=button[name=\"Sign In\"]");
}

#[tokio::test]
async fn test_repeated_success_is_decided_from_history() {
    let stores = Stores::new();
    let browser = login_page();
    let list = steps(&["click the Sign In button"]);

    for _ in 0..3 {
        let executor = LiveExecutor::new(
            browser.clone(),
            stores.engine(LearningConfig::default()),
            fast_config(),
        );
        let report = executor.run(&list, Some(LOGIN_URL)).await.unwrap();
        assert_eq!(report.final_state, ExecutionState::Completed);
    }

    let executor = LiveExecutor::new(
        browser.clone(),
        stores.engine(LearningConfig::default()),
        fast_config(),
    );
    let report = executor.run(&list, Some(LOGIN_URL)).await.unwrap();
    let element = report.results[0].element.as_ref().unwrap();
    assert_eq!(element.via, LocateStrategy::Decision);
    assert_eq!(element.source, Some(DecisionSource::History));
    assert_eq!(element.selector, "role=button[name=\"Sign In\"]");
    assert_eq!(element.confidence, 1.0);

    let stats = stores.index.stats().unwrap();
    assert_eq!((stats.entries, stats.total_successes), (1, 4));
}

#[tokio::test]
async fn test_uncorrected_failure_is_recorded_with_snapshot() {
    let stores = Stores::new();
    let executor = LiveExecutor::new(
        login_page(),
        stores.engine(LearningConfig::default()),
        fast_config(),
    );

    let report = executor
        .run(&steps(&["click the Checkout button"]), Some(LOGIN_URL))
        .await
        .unwrap();

    assert_eq!(report.final_state, ExecutionState::Failed);
    let result = &report.results[0];
    assert!(!result.success);
    assert_eq!(result.outcome, Outcome::Failure);
    assert_eq!(result.retries, 2);
    assert_eq!(
        result.error.as_deref(),
        Some("Could not find element: Checkout")
    );

    let snapshots = stores.ledger.page_snapshots(&report.session_id).unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].step_index, 0);
    assert!(snapshots[0].dom_snapshot.contains("<body>"));
    assert!(snapshots[0].screenshot_base64.is_some());
    assert_eq!(report.session.unwrap().failed_steps, 1);
}

#[tokio::test]
async fn test_unknown_step_fails_without_retries() {
    let stores = Stores::new();
    let executor = LiveExecutor::new(
        login_page(),
        stores.engine(LearningConfig::default()),
        fast_config(),
    );

    let report = executor
        .run(&steps(&["do a little dance"]), Some(LOGIN_URL))
        .await
        .unwrap();

    let result = &report.results[0];
    assert!(!result.success);
    assert_eq!(result.retries, 0);
    assert!(result.error.as_deref().unwrap().starts_with("Could not understand step"));
}

#[tokio::test]
async fn test_fail_fast_stops_after_first_failure() {
    let stores = Stores::new();
    let list = steps(&["click Nowhere", "click the Sign In button"]);

    let executor = LiveExecutor::new(
        login_page(),
        stores.engine(LearningConfig::default()),
        ExecutorConfig {
            fail_fast: true,
            ..fast_config()
        },
    );
    let report = executor.run(&list, Some(LOGIN_URL)).await.unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.final_state, ExecutionState::Failed);

    let executor = LiveExecutor::new(
        login_page(),
        stores.engine(LearningConfig::default()),
        fast_config(),
    );
    let report = executor.run(&list, Some(LOGIN_URL)).await.unwrap();
    assert_eq!(report.results.len(), 2);
    assert!(report.results[1].success);
    assert_eq!(report.final_state, ExecutionState::Failed);
}

/// Pauses the run once the first step has completed.
struct PauseAfterFirstStep {
    control: ExecutionControl,
}

impl ExecutionHooks for PauseAfterFirstStep {
    fn on_step_complete(&self, result: &StepResult) {
        if result.step_index == 0 {
            self.control.pause();
        }
    }
}

fn pausing_executor(stores: &Stores, browser: Arc<MockBrowser>) -> Arc<LiveExecutor> {
    let executor = LiveExecutor::new(
        browser,
        stores.engine(LearningConfig::default()),
        fast_config(),
    );
    let control = executor.control();
    Arc::new(executor.with_hooks(Arc::new(PauseAfterFirstStep { control })))
}

#[tokio::test]
async fn test_pause_and_resume() {
    let stores = Stores::new();
    let browser = login_page();
    let executor = pausing_executor(&stores, browser.clone());
    let control = executor.control();
    let list = steps(&["click the Sign In button", "press Enter"]);

    let run = {
        let executor = executor.clone();
        let list = list.clone();
        tokio::spawn(async move { executor.run(&list, Some(LOGIN_URL)).await })
    };

    wait_for_state(&control, ExecutionState::Paused).await;
    assert_eq!(browser.actions().len(), 2);
    assert!(matches!(
        executor.run(&list, None).await,
        Err(ExecutionError::AlreadyRunning)
    ));

    control.resume();
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.final_state, ExecutionState::Completed);
    assert_eq!(report.results.len(), 2);
    assert_eq!(browser.actions().last().map(String::as_str), Some("press Enter"));
}

#[tokio::test]
async fn test_stop_while_paused() {
    let stores = Stores::new();
    let browser = login_page();
    let executor = pausing_executor(&stores, browser.clone());
    let control = executor.control();

    let run = {
        let executor = executor.clone();
        let list = steps(&["click the Sign In button", "press Enter"]);
        tokio::spawn(async move { executor.run(&list, Some(LOGIN_URL)).await })
    };

    wait_for_state(&control, ExecutionState::Paused).await;
    control.stop();

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.final_state, ExecutionState::Failed);
    assert_eq!(report.results.len(), 1);
    assert!(!browser.actions().iter().any(|a| a.starts_with("press")));
}

/// Offers a correction as soon as the first step has completed.
struct EagerCorrection {
    control: ExecutionControl,
    accepted: Mutex<Option<bool>>,
}

impl ExecutionHooks for EagerCorrection {
    fn on_step_complete(&self, result: &StepResult) {
        if result.step_index == 0 {
            let accepted = self.control.provide_correction("click the Sign In button");
            *self.accepted.lock() = Some(accepted);
        }
    }
}

#[tokio::test]
async fn test_unrequested_correction_is_not_applied_later() {
    let stores = Stores::new();
    let browser = login_page();
    let executor = LiveExecutor::new(
        browser.clone(),
        stores.engine(LearningConfig::default()),
        ExecutorConfig {
            correction_timeout_secs: 1,
            ..fast_config()
        },
    );
    let hooks = Arc::new(EagerCorrection {
        control: executor.control(),
        accepted: Mutex::new(None),
    });
    let executor = executor.with_hooks(hooks.clone());

    let report = executor
        .run(
            &steps(&["press Enter", "click the login button"]),
            Some(LOGIN_URL),
        )
        .await
        .unwrap();

    assert_eq!(*hooks.accepted.lock(), Some(false));
    assert_eq!(report.final_state, ExecutionState::Failed);
    let result = &report.results[1];
    assert_eq!(result.outcome, Outcome::Failure);
    assert_eq!(result.user_correction, None);
    assert!(!browser.actions().iter().any(|a| a.starts_with("click")));
    assert!(stores
        .ledger
        .find_correction("click the login button", Some(LOGIN_URL))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_stop_before_run_is_honoured() {
    let stores = Stores::new();
    let browser = login_page();
    let executor = LiveExecutor::new(
        browser.clone(),
        stores.engine(LearningConfig::default()),
        fast_config(),
    );
    let list = steps(&["click the Sign In button"]);

    executor.control().stop();
    let report = executor.run(&list, Some(LOGIN_URL)).await.unwrap();
    assert_eq!(report.final_state, ExecutionState::Failed);
    assert!(report.results.is_empty());
    assert!(browser.actions().is_empty());

    // The stop belonged to that run; the next one proceeds.
    let report = executor.run(&list, Some(LOGIN_URL)).await.unwrap();
    assert_eq!(report.final_state, ExecutionState::Completed);
    assert_eq!(browser.actions().len(), 2);
}

#[tokio::test]
async fn test_pause_before_run_holds_first_step() {
    let stores = Stores::new();
    let browser = login_page();
    let executor = Arc::new(LiveExecutor::new(
        browser.clone(),
        stores.engine(LearningConfig::default()),
        fast_config(),
    ));
    let control = executor.control();
    control.pause();

    let run = {
        let executor = executor.clone();
        let list = steps(&["click the Sign In button"]);
        tokio::spawn(async move { executor.run(&list, Some(LOGIN_URL)).await })
    };

    wait_for_state(&control, ExecutionState::Paused).await;
    assert_eq!(browser.actions(), vec![format!("navigate {}", LOGIN_URL)]);

    control.resume();
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.final_state, ExecutionState::Completed);
    assert_eq!(browser.actions().len(), 2);
}

#[tokio::test]
async fn test_navigation_steps_are_recorded() {
    let stores = Stores::new();
    let browser = login_page();
    let executor = LiveExecutor::new(
        browser.clone(),
        stores.engine(LearningConfig::default()),
        fast_config(),
    );

    let report = executor
        .run(
            &steps(&["go to example.com/login", "scroll down", "go back", "wait 0 seconds"]),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.final_state, ExecutionState::Completed);
    assert_eq!(
        browser.actions(),
        vec![
            format!("navigate {}", LOGIN_URL),
            "scroll down".to_string(),
            "back".to_string(),
        ]
    );
    let recording = executor.recording();
    assert_eq!(recording.steps.len(), 4);
    assert!(report.artifact.contains("  go back"));
    assert!(report.artifact.contains("  wait 0 seconds"));
}
