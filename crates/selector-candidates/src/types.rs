//! Core types for candidate generation

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Locator strategy enumeration, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    TestId,
    RoleName,
    Label,
    Placeholder,
    AltText,
    Title,
    Text,
    CssId,
    CssClass,
    CssAttribute,
    XPath,
}

impl SelectorStrategy {
    /// Every strategy in evaluation order
    pub const ALL: [SelectorStrategy; 11] = [
        SelectorStrategy::TestId,
        SelectorStrategy::RoleName,
        SelectorStrategy::Label,
        SelectorStrategy::Placeholder,
        SelectorStrategy::AltText,
        SelectorStrategy::Title,
        SelectorStrategy::Text,
        SelectorStrategy::CssId,
        SelectorStrategy::CssClass,
        SelectorStrategy::CssAttribute,
        SelectorStrategy::XPath,
    ];

    /// Get strategy name as string
    pub fn name(&self) -> &'static str {
        match self {
            SelectorStrategy::TestId => "test_id",
            SelectorStrategy::RoleName => "role_name",
            SelectorStrategy::Label => "label",
            SelectorStrategy::Placeholder => "placeholder",
            SelectorStrategy::AltText => "alt_text",
            SelectorStrategy::Title => "title",
            SelectorStrategy::Text => "text",
            SelectorStrategy::CssId => "css_id",
            SelectorStrategy::CssClass => "css_class",
            SelectorStrategy::CssAttribute => "css_attribute",
            SelectorStrategy::XPath => "xpath",
        }
    }

    /// Look up a strategy by its [`name`](Self::name).
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Base score before uniqueness and history adjustments.
    ///
    /// Text has two tiers; this is the exact-match tier.
    pub fn base_score(&self) -> f64 {
        match self {
            SelectorStrategy::TestId => 0.95,
            SelectorStrategy::RoleName => 0.90,
            SelectorStrategy::Label => 0.88,
            SelectorStrategy::Placeholder => 0.85,
            SelectorStrategy::AltText => 0.85,
            SelectorStrategy::Title => 0.80,
            SelectorStrategy::Text => 0.75,
            SelectorStrategy::CssId => 0.70,
            SelectorStrategy::CssClass => 0.60,
            SelectorStrategy::CssAttribute => 0.55,
            SelectorStrategy::XPath => 0.50,
        }
    }

    /// How pleasant the selector is for a human to read and maintain.
    pub fn readability(&self) -> f64 {
        match self {
            SelectorStrategy::TestId => 0.9,
            SelectorStrategy::RoleName => 0.95,
            SelectorStrategy::Label => 0.95,
            SelectorStrategy::Placeholder => 0.9,
            SelectorStrategy::AltText => 0.85,
            SelectorStrategy::Title => 0.8,
            SelectorStrategy::Text => 0.9,
            SelectorStrategy::CssId => 0.7,
            SelectorStrategy::CssClass => 0.5,
            SelectorStrategy::CssAttribute => 0.6,
            SelectorStrategy::XPath => 0.3,
        }
    }

    /// Strategies whose selectors can match several nodes on one page.
    pub fn needs_uniqueness_check(&self) -> bool {
        matches!(self, SelectorStrategy::Text | SelectorStrategy::CssClass)
    }
}

/// A concrete locator proposal for one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorCandidate {
    /// Strategy that produced this candidate
    pub strategy: SelectorStrategy,

    /// Raw selector string understood by the browser surface
    pub selector: String,

    /// Human-readable rendering, e.g. `testId "login-btn"`
    pub reference: String,

    /// Ranking score (0.0-1.0)
    pub score: f64,

    /// False when the selector matched more than one page element
    pub is_unique: bool,

    /// Number of page elements matched during the uniqueness check
    pub match_count: Option<usize>,

    /// Historical success rate, 0.5 until observed
    pub stability_score: f64,

    pub readability_score: f64,
}

impl SelectorCandidate {
    /// Create a candidate with the strategy's defaults
    pub fn new(
        strategy: SelectorStrategy,
        selector: impl Into<String>,
        reference: impl Into<String>,
        score: f64,
    ) -> Self {
        Self {
            strategy,
            selector: selector.into(),
            reference: reference.into(),
            score,
            is_unique: true,
            match_count: None,
            stability_score: DEFAULT_STABILITY,
            readability_score: strategy.readability(),
        }
    }

    /// Check if this is a high-confidence match (>= 0.8)
    pub fn is_high_confidence(&self) -> bool {
        self.score >= 0.8
    }

    /// Check if this is an acceptable match (>= 0.5)
    pub fn is_acceptable(&self) -> bool {
        self.score >= 0.5
    }
}

/// Stability assumed for selectors without any recorded outcome.
pub const DEFAULT_STABILITY: f64 = 0.5;

/// Recorded performance of one selector for one element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub attempts: u32,
    pub success_rate: f64,
}

/// Selector → history for a single fingerprint.
pub type SelectorHistory = HashMap<String, HistoryEntry>;

/// Coefficients for blending a base score with a historical success rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryBlend {
    pub base_weight: f64,
    pub history_weight: f64,
}

impl Default for HistoryBlend {
    fn default() -> Self {
        Self {
            base_weight: 0.7,
            history_weight: 0.3,
        }
    }
}

impl HistoryBlend {
    pub fn apply(&self, base: f64, success_rate: f64) -> f64 {
        (self.base_weight * base + self.history_weight * success_rate).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_names_round_trip() {
        for strategy in SelectorStrategy::ALL {
            assert_eq!(SelectorStrategy::from_name(strategy.name()), Some(strategy));
        }
        assert_eq!(SelectorStrategy::from_name("nope"), None);
    }

    #[test]
    fn test_base_scores_follow_priority() {
        let scores: Vec<f64> = SelectorStrategy::ALL.iter().map(|s| s.base_score()).collect();
        assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
    }

    #[test]
    fn test_candidate_thresholds() {
        let high = SelectorCandidate::new(SelectorStrategy::TestId, "[data-testid=\"x\"]", "", 0.95);
        assert!(high.is_high_confidence());
        let low = SelectorCandidate::new(SelectorStrategy::XPath, "//a", "", 0.45);
        assert!(!low.is_acceptable());
        assert_eq!(low.stability_score, DEFAULT_STABILITY);
    }

    #[test]
    fn test_history_blend() {
        let blend = HistoryBlend::default();
        assert!((blend.apply(0.95, 1.0) - 0.965).abs() < 1e-9);
        assert!((blend.apply(0.6, 0.0) - 0.42).abs() < 1e-9);
    }
}
