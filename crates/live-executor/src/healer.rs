//! Outer self-healing loop for generated scenarios
//!
//! The live executor fixes individual steps. Once a scenario artifact exists,
//! [`ScenarioHealer`] replays it through an external runner and asks the
//! completion service for a revised artifact after every failure, within a
//! fixed attempt budget.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::completion::CompletionService;

pub const DEFAULT_HEAL_BUDGET: u32 = 20;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[\w-]*\n(.*?)```").expect("fenced block regex compiles"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum ScenarioRunOutcome {
    Passed,
    Failed(String),
}

/// Replays a scenario artifact end to end.
#[async_trait]
pub trait ScenarioRunner: Send + Sync {
    async fn run(&self, artifact: &str) -> ScenarioRunOutcome;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealAttempt {
    pub attempt: u32,
    pub passed: bool,
    pub error: Option<String>,
    pub artifact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealReport {
    pub passed: bool,
    pub final_artifact: String,
    pub attempts: Vec<HealAttempt>,
}

pub struct ScenarioHealer {
    runner: Arc<dyn ScenarioRunner>,
    completion: Option<Arc<dyn CompletionService>>,
    budget: u32,
}

impl ScenarioHealer {
    pub fn new(runner: Arc<dyn ScenarioRunner>) -> Self {
        Self {
            runner,
            completion: None,
            budget: DEFAULT_HEAL_BUDGET,
        }
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// At least one attempt is always made.
    pub fn with_budget(mut self, budget: u32) -> Self {
        self.budget = budget.max(1);
        self
    }

    pub async fn heal(&self, artifact: &str) -> HealReport {
        let mut current = artifact.to_string();
        let mut attempts = Vec::new();

        for attempt in 1..=self.budget {
            let outcome = self.runner.run(&current).await;
            let error = match outcome {
                ScenarioRunOutcome::Passed => {
                    info!(attempt, "Scenario passed");
                    attempts.push(HealAttempt {
                        attempt,
                        passed: true,
                        error: None,
                        artifact: current.clone(),
                    });
                    return HealReport {
                        passed: true,
                        final_artifact: current,
                        attempts,
                    };
                }
                ScenarioRunOutcome::Failed(error) => error,
            };
            warn!(attempt, budget = self.budget, error = %error, "Scenario failed");
            attempts.push(HealAttempt {
                attempt,
                passed: false,
                error: Some(error.clone()),
                artifact: current.clone(),
            });

            if attempt == self.budget {
                break;
            }
            let Some(completion) = self.completion.as_deref() else {
                continue;
            };
            match completion.generate(&heal_prompt(&current, &error)).await {
                Ok(reply) => match extract_artifact(&reply) {
                    Some(revised) => current = revised,
                    None => warn!(attempt, "Completion reply held no artifact; keeping current one"),
                },
                Err(err) => warn!(attempt, error = %err, "Artifact regeneration failed"),
            }
        }

        HealReport {
            passed: false,
            final_artifact: current,
            attempts,
        }
    }
}

fn heal_prompt(artifact: &str, error: &str) -> String {
    format!(
        r#"The following test scenario failed.

Scenario:
```
{artifact}
```

Error:
{error}

Fix the scenario so that it passes. Keep every step that is not related to the error unchanged.
Return the complete corrected scenario in a single fenced code block."#
    )
}

/// Scenario text from a completion reply: the first fenced block, or the whole
/// reply when it already starts like an artifact.
pub fn extract_artifact(reply: &str) -> Option<String> {
    if let Some(caps) = FENCED_BLOCK.captures(reply) {
        let block = caps[1].trim();
        if !block.is_empty() {
            return Some(format!("{}\n", block));
        }
    }
    let trimmed = reply.trim();
    if trimmed.starts_with("Feature ") || trimmed.starts_with("Page ") {
        return Some(format!("{}\n", trimmed));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CompletionError;
    use parking_lot::Mutex;

    /// Passes once the artifact contains `needle`.
    struct NeedleRunner {
        needle: &'static str,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScenarioRunner for NeedleRunner {
        async fn run(&self, artifact: &str) -> ScenarioRunOutcome {
            self.seen.lock().push(artifact.to_string());
            if artifact.contains(self.needle) {
                ScenarioRunOutcome::Passed
            } else {
                ScenarioRunOutcome::Failed(format!("missing {}", self.needle))
            }
        }
    }

    struct FixingCompletion;

    #[async_trait]
    impl CompletionService for FixingCompletion {
        async fn generate(&self, prompt: &str) -> Result<String, CompletionError> {
            assert!(prompt.contains("missing fixed"));
            Ok("Here is the fix:\n```text\nFeature \"Checkout\"\n  fixed\n```".to_string())
        }

        async fn generate_with_image(&self, _: &str, _: &str) -> Result<String, CompletionError> {
            Err(CompletionError::Unavailable)
        }
    }

    #[tokio::test]
    async fn test_heals_after_regeneration() {
        let runner = Arc::new(NeedleRunner {
            needle: "fixed",
            seen: Mutex::new(Vec::new()),
        });
        let healer = ScenarioHealer::new(runner.clone())
            .with_completion(Arc::new(FixingCompletion))
            .with_budget(5);

        let report = healer.heal("Feature \"Checkout\"\n  broken\n").await;
        assert!(report.passed);
        assert_eq!(report.attempts.len(), 2);
        assert!(!report.attempts[0].passed);
        assert_eq!(report.final_artifact, "Feature \"Checkout\"\n  fixed\n");
        assert_eq!(runner.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_budget_bounds_attempts() {
        let runner = Arc::new(NeedleRunner {
            needle: "never",
            seen: Mutex::new(Vec::new()),
        });
        let report = ScenarioHealer::new(runner.clone())
            .with_budget(3)
            .heal("Feature \"X\"\n")
            .await;
        assert!(!report.passed);
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(report.final_artifact, "Feature \"X\"\n");
        assert_eq!(report.attempts[2].error.as_deref(), Some("missing never"));
    }

    #[test]
    fn test_extract_artifact() {
        assert_eq!(
            extract_artifact("```\nPage LoginPage\n```").as_deref(),
            Some("Page LoginPage\n")
        );
        assert_eq!(extract_artifact("Feature \"A\"").as_deref(), Some("Feature \"A\"\n"));
        assert_eq!(extract_artifact("I cannot help with that"), None);
    }
}
