//! Execution callbacks
//!
//! Hooks are synchronous and must not block; [`BroadcastHooks`] turns them
//! into an event stream for async consumers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::control::ExecutionState;
use crate::executor::StepResult;

/// Observer of a live execution. Every method defaults to a no-op.
pub trait ExecutionHooks: Send + Sync {
    fn on_step_complete(&self, _result: &StepResult) {}

    fn on_state_change(&self, _state: ExecutionState) {}

    fn on_screenshot(&self, _step_index: usize, _screenshot_base64: &str) {}

    /// Current scenario artifact, re-rendered after each recorded step.
    fn on_artifact_generated(&self, _artifact: &str) {}

    fn on_correction_requested(&self, _step_index: usize, _step_text: &str, _error: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl ExecutionHooks for NoopHooks {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    StepCompleted {
        result: StepResult,
    },
    StateChanged {
        state: ExecutionState,
    },
    Screenshot {
        step_index: usize,
        screenshot_base64: String,
    },
    ArtifactGenerated {
        artifact: String,
    },
    CorrectionRequested {
        step_index: usize,
        step_text: String,
        error: String,
    },
}

/// Publishes every hook call on a broadcast channel.
///
/// Events sent while nobody is subscribed are dropped.
pub struct BroadcastHooks {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl BroadcastHooks {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }
}

impl ExecutionHooks for BroadcastHooks {
    fn on_step_complete(&self, result: &StepResult) {
        self.publish(ExecutionEvent::StepCompleted {
            result: result.clone(),
        });
    }

    fn on_state_change(&self, state: ExecutionState) {
        self.publish(ExecutionEvent::StateChanged { state });
    }

    fn on_screenshot(&self, step_index: usize, screenshot_base64: &str) {
        self.publish(ExecutionEvent::Screenshot {
            step_index,
            screenshot_base64: screenshot_base64.to_string(),
        });
    }

    fn on_artifact_generated(&self, artifact: &str) {
        self.publish(ExecutionEvent::ArtifactGenerated {
            artifact: artifact.to_string(),
        });
    }

    fn on_correction_requested(&self, step_index: usize, step_text: &str, error: &str) {
        self.publish(ExecutionEvent::CorrectionRequested {
            step_index,
            step_text: step_text.to_string(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_hooks_forward_events() {
        let hooks = BroadcastHooks::new(8);
        hooks.on_state_change(ExecutionState::Running);

        let mut rx = hooks.subscribe();
        hooks.on_correction_requested(2, "click Login", "Could not find element: Login");
        hooks.on_state_change(ExecutionState::WaitingForCorrection);

        match rx.recv().await.unwrap() {
            ExecutionEvent::CorrectionRequested {
                step_index, step_text, ..
            } => {
                assert_eq!(step_index, 2);
                assert_eq!(step_text, "click Login");
            }
            other => panic!("unexpected event {other:?}"),
        }
        let event = rx.recv().await.unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "state_changed");
        assert_eq!(json["state"], "waiting_for_correction");
    }
}
