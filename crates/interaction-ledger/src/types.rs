//! Ledger record types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mender_core_types::{
    BoundingBox, ElementDescriptor, Fingerprint, InteractionId, Outcome, SessionId,
};
use serde::{Deserialize, Serialize};

/// One end-to-end run of an ordered list of steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub target_url: String,
    pub steps: Vec<String>,
    pub successful_steps: u32,
    pub failed_steps: u32,
    pub corrected_steps: u32,
    /// Generated test-definition text, once the run has finished
    pub artifact: Option<String>,
}

impl Session {
    /// Create a new session starting now
    pub fn new(target_url: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            id: SessionId::new(),
            started_at: Utc::now(),
            ended_at: None,
            target_url: target_url.into(),
            steps,
            successful_steps: 0,
            failed_steps: 0,
            corrected_steps: 0,
            artifact: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Tally one outcome into the step counters
    pub fn count_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.successful_steps += 1,
            Outcome::Corrected => self.corrected_steps += 1,
            Outcome::Failure | Outcome::Timeout => self.failed_steps += 1,
            Outcome::Skipped => {}
        }
    }
}

/// Record of attempting one step against one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: InteractionId,
    pub timestamp: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    pub tag_name: String,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    pub bounding_box: Option<BoundingBox>,
    pub selector_used: String,
    pub strategy: String,
    pub selectors_tried: Vec<String>,
    pub page_url: String,
    pub page_title: String,
    pub step_text: String,
    pub action_type: String,
    pub action_value: Option<String>,
    pub outcome: Outcome,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub retries: u32,
    pub user_correction: Option<String>,
    pub corrected_selector: Option<String>,
    pub confidence: f64,
}

impl Interaction {
    /// Snapshot `element` into a new interaction record
    pub fn new(
        element: &ElementDescriptor,
        selector_used: impl Into<String>,
        step_text: impl Into<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            id: InteractionId::new(),
            timestamp: Utc::now(),
            fingerprint: Fingerprint::of(element),
            tag_name: element.tag_name.clone(),
            text: element.text.clone(),
            attributes: element.attributes.clone(),
            bounding_box: element.bounding_box,
            selector_used: selector_used.into(),
            strategy: String::new(),
            selectors_tried: Vec::new(),
            page_url: String::new(),
            page_title: String::new(),
            step_text: step_text.into(),
            action_type: String::new(),
            action_value: None,
            outcome,
            error_message: None,
            duration_ms: 0,
            retries: 0,
            user_correction: None,
            corrected_selector: None,
            confidence: 0.0,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    pub fn with_page(mut self, url: impl Into<String>, title: impl Into<String>) -> Self {
        self.page_url = url.into();
        self.page_title = title.into();
        self
    }

    pub fn with_action(mut self, action_type: impl Into<String>, value: Option<String>) -> Self {
        self.action_type = action_type.into();
        self.action_value = value;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_selectors_tried(mut self, selectors: Vec<String>) -> Self {
        self.selectors_tried = selectors;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Attach a human correction and the selector it resolved to
    pub fn with_correction(
        mut self,
        user_correction: impl Into<String>,
        corrected_selector: Option<String>,
    ) -> Self {
        self.user_correction = Some(user_correction.into());
        self.corrected_selector = corrected_selector.filter(|s| !s.is_empty());
        self
    }

    /// True when this record should teach a correction mapping
    pub fn carries_correction(&self) -> bool {
        self.user_correction.as_deref().is_some_and(|c| !c.is_empty())
            && self.corrected_selector.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Aggregate performance of one selector for one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorStat {
    pub fingerprint: Fingerprint,
    pub selector: String,
    pub attempts: u32,
    pub successes: u32,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub last_used: DateTime<Utc>,
}

/// Learned replacement for a step that automated resolution got wrong
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionMapping {
    pub id: i64,
    pub original_step: String,
    pub page_url_pattern: String,
    pub corrected_selector: String,
    pub user_correction: String,
    pub times_applied: u32,
    pub created_at: DateTime<Utc>,
    pub last_applied: DateTime<Utc>,
}

/// DOM and screenshot captured at a step boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub session_id: SessionId,
    pub step_index: usize,
    pub page_url: String,
    pub dom_snapshot: String,
    pub screenshot_base64: Option<String>,
    pub taken_at: DateTime<Utc>,
}

/// Aggregate numbers across the whole ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_sessions: u64,
    pub total_interactions: u64,
    pub successful_interactions: u64,
    pub success_rate: f64,
    pub distinct_elements: u64,
    pub tracked_selectors: u64,
    pub correction_mappings: u64,
    pub top_selectors: Vec<SelectorStat>,
}

/// Rows removed by a retention cleanup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub interactions: usize,
    pub snapshots: usize,
    pub sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counts_outcomes() {
        let mut session = Session::new("https://example.com", vec!["a".into()]);
        session.count_outcome(Outcome::Success);
        session.count_outcome(Outcome::Corrected);
        session.count_outcome(Outcome::Timeout);
        session.count_outcome(Outcome::Skipped);
        assert_eq!(
            (session.successful_steps, session.corrected_steps, session.failed_steps),
            (1, 1, 1)
        );
    }

    #[test]
    fn test_correction_requires_selector() {
        let element = ElementDescriptor::new("button");
        let without = Interaction::new(&element, "", "click", Outcome::Corrected)
            .with_correction("click Sign In", Some(String::new()));
        assert!(!without.carries_correction());

        let with = Interaction::new(&element, "#signin", "click", Outcome::Corrected)
            .with_correction("click Sign In", Some("#signin".into()));
        assert!(with.carries_correction());
    }
}
