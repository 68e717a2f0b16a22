//! Selector decisions and recommendations

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::weights::WeightKey;

/// Confidence of a learned correction that short-circuits resolution.
pub const CORRECTION_CONFIDENCE: f64 = 0.95;

/// Confidence of the last-resort `tag:has-text(...)` selector.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Where a decision came from, in descending order of trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    LearnedCorrection,
    History,
    SemanticMatch,
    Generated,
    Alternative,
    Fallback,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::LearnedCorrection => "learned_correction",
            DecisionSource::History => "history",
            DecisionSource::SemanticMatch => "semantic_match",
            DecisionSource::Generated => "generated",
            DecisionSource::Alternative => "alternative",
            DecisionSource::Fallback => "fallback",
        }
    }

    /// Signal weight credited or blamed for an outcome from this source.
    pub fn weight_key(&self, strategy: &str) -> Option<WeightKey> {
        match self {
            DecisionSource::History => Some(WeightKey::HistoryMatch),
            DecisionSource::SemanticMatch => Some(WeightKey::SemanticSimilarity),
            DecisionSource::Generated if strategy == "text" => Some(WeightKey::TextMatch),
            _ => None,
        }
    }
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub selector: String,
    pub score: f64,
    pub source: DecisionSource,
}

impl Alternative {
    pub fn new(selector: impl Into<String>, score: f64, source: DecisionSource) -> Self {
        Self {
            selector: selector.into(),
            score,
            source,
        }
    }
}

/// The selector chosen for one step, with runners-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectorDecision {
    pub selector: String,
    pub strategy: String,
    pub confidence: f64,
    pub source: DecisionSource,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

impl SelectorDecision {
    pub fn new(
        selector: impl Into<String>,
        strategy: impl Into<String>,
        confidence: f64,
        source: DecisionSource,
    ) -> Self {
        Self {
            selector: selector.into(),
            strategy: strategy.into(),
            confidence,
            source,
            alternatives: Vec::new(),
        }
    }

    pub fn with_alternatives(mut self, alternatives: Vec<Alternative>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn is_confident(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

/// Adaptive-matcher result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedMatch {
    pub selector: String,
    pub confidence: f64,
    pub signal: WeightKey,
}

/// One entry of a recommendation listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub selector: String,
    pub strategy: String,
    pub score: f64,
    pub source: DecisionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similar_text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_key_mapping() {
        assert_eq!(
            DecisionSource::History.weight_key("css_id"),
            Some(WeightKey::HistoryMatch)
        );
        assert_eq!(
            DecisionSource::SemanticMatch.weight_key("semantic"),
            Some(WeightKey::SemanticSimilarity)
        );
        assert_eq!(
            DecisionSource::Generated.weight_key("text"),
            Some(WeightKey::TextMatch)
        );
        assert_eq!(DecisionSource::Generated.weight_key("test_id"), None);
        assert_eq!(DecisionSource::LearnedCorrection.weight_key("text"), None);
    }

    #[test]
    fn test_source_serializes_snake_case() {
        let json = serde_json::to_string(&DecisionSource::LearnedCorrection).unwrap();
        assert_eq!(json, "\"learned_correction\"");
    }
}
