//! Execution state and run control (pause, resume, stop, corrections)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Idle,
    Running,
    Paused,
    WaitingForCorrection,
    Completed,
    Failed,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Idle => "idle",
            ExecutionState::Running => "running",
            ExecutionState::Paused => "paused",
            ExecutionState::WaitingForCorrection => "waiting_for_correction",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Failed)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Inner {
    state: watch::Sender<ExecutionState>,
    paused: watch::Sender<bool>,
    stop: parking_lot::Mutex<CancellationToken>,
    corrections_tx: mpsc::UnboundedSender<String>,
    corrections_rx: AsyncMutex<mpsc::UnboundedReceiver<String>>,
}

/// Handle for steering a running execution from another task.
///
/// Cloning is cheap; every clone controls the same execution.
#[derive(Clone)]
pub struct ExecutionControl {
    inner: Arc<Inner>,
}

impl Default for ExecutionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ExecutionState::Idle);
        let (paused, _) = watch::channel(false);
        let (corrections_tx, corrections_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                state,
                paused,
                stop: parking_lot::Mutex::new(CancellationToken::new()),
                corrections_tx,
                corrections_rx: AsyncMutex::new(corrections_rx),
            }),
        }
    }

    /// Takes effect before the next step starts.
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
    }

    /// Abort the run: pending waits end and no further step starts.
    pub fn stop(&self) {
        self.inner.stop.lock().cancel();
        self.inner.paused.send_replace(false);
    }

    /// Answer an outstanding correction request with a replacement step.
    ///
    /// Returns `false` and drops the correction when no request is pending.
    pub fn provide_correction(&self, correction: impl Into<String>) -> bool {
        // Held across the send so the request cannot close in between.
        let state = self.inner.state.borrow();
        if *state != ExecutionState::WaitingForCorrection {
            debug!(state = %*state, "Correction dropped; none requested");
            return false;
        }
        if self.inner.corrections_tx.send(correction.into()).is_err() {
            debug!("Correction dropped; receiver gone");
            return false;
        }
        true
    }

    pub fn state(&self) -> ExecutionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ExecutionState> {
        self.inner.state.subscribe()
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.paused.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.lock().is_cancelled()
    }

    /// Re-arm for the next run once the current one is over.
    ///
    /// A stop or pause issued between runs therefore applies to the next run.
    pub(crate) async fn finish_run(&self) {
        *self.inner.stop.lock() = CancellationToken::new();
        self.inner.paused.send_replace(false);
        self.discard_corrections().await;
    }

    /// Drop corrections that arrived after their request closed.
    pub(crate) async fn discard_corrections(&self) {
        let mut rx = self.inner.corrections_rx.lock().await;
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "Discarded late corrections");
        }
    }

    pub(crate) fn set_state(&self, state: ExecutionState) -> ExecutionState {
        self.inner.state.send_replace(state)
    }

    fn stop_token(&self) -> CancellationToken {
        self.inner.stop.lock().clone()
    }

    /// Block while paused. Returns `false` once the run is stopped.
    pub(crate) async fn wait_while_paused(&self) -> bool {
        let token = self.stop_token();
        let mut paused = self.inner.paused.subscribe();
        tokio::select! {
            _ = token.cancelled() => false,
            res = paused.wait_for(|p| !*p) => res.is_ok() && !token.is_cancelled(),
        }
    }

    /// Next non-empty correction, or `None` on timeout or stop.
    pub(crate) async fn wait_for_correction(&self, timeout: Duration) -> Option<String> {
        let token = self.stop_token();
        let mut rx = self.inner.corrections_rx.lock().await;
        let wait = async {
            loop {
                match rx.recv().await {
                    Some(correction) if !correction.trim().is_empty() => {
                        return Some(correction.trim().to_string())
                    }
                    Some(_) => continue,
                    None => return None,
                }
            }
        };
        tokio::select! {
            _ = token.cancelled() => None,
            res = tokio::time::timeout(timeout, wait) => res.ok().flatten(),
        }
    }

    /// Sleep for `duration`. Returns `false` if the run was stopped meanwhile.
    pub(crate) async fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.is_stopped();
        }
        let token = self.stop_token();
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pause_gate_releases_on_resume() {
        let control = ExecutionControl::new();
        control.pause();
        assert!(control.is_paused());

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        control.resume();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_stop_releases_pause_and_correction_waits() {
        let control = ExecutionControl::new();
        control.pause();
        let paused = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        let correction = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_for_correction(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.stop();

        assert!(!paused.await.unwrap());
        assert_eq!(correction.await.unwrap(), None);
        assert!(control.is_stopped());

        control.finish_run().await;
        assert!(!control.is_stopped());
        assert!(!control.is_paused());
    }

    #[tokio::test]
    async fn test_corrections_skip_blank_entries() {
        let control = ExecutionControl::new();
        control.set_state(ExecutionState::WaitingForCorrection);

        assert!(control.provide_correction("   "));
        assert!(control.provide_correction(" click Sign In "));
        let got = control.wait_for_correction(Duration::from_secs(1)).await;
        assert_eq!(got.as_deref(), Some("click Sign In"));

        let got = control.wait_for_correction(Duration::from_millis(10)).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_unrequested_correction_is_rejected() {
        let control = ExecutionControl::new();
        assert!(!control.provide_correction("click Sign In"));

        control.set_state(ExecutionState::Running);
        assert!(!control.provide_correction("click Sign In"));

        control.set_state(ExecutionState::WaitingForCorrection);
        let got = control.wait_for_correction(Duration::from_millis(10)).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_late_correction_is_discarded() {
        let control = ExecutionControl::new();
        control.set_state(ExecutionState::WaitingForCorrection);
        assert_eq!(control.wait_for_correction(Duration::from_millis(10)).await, None);
        assert!(control.provide_correction("too late"));
        control.set_state(ExecutionState::Running);
        control.discard_corrections().await;

        control.set_state(ExecutionState::WaitingForCorrection);
        assert_eq!(control.wait_for_correction(Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn test_stop_before_run_is_kept() {
        let control = ExecutionControl::new();
        control.stop();
        control.pause();
        assert!(control.is_stopped());
        assert!(!control.wait_while_paused().await);
    }

    #[test]
    fn test_state_transitions_are_observable() {
        let control = ExecutionControl::new();
        let rx = control.subscribe_state();
        assert_eq!(control.state(), ExecutionState::Idle);
        let previous = control.set_state(ExecutionState::Running);
        assert_eq!(previous, ExecutionState::Idle);
        assert_eq!(*rx.borrow(), ExecutionState::Running);
        assert!(!ExecutionState::Running.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
    }
}
