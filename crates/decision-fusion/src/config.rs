//! Learning configuration

use selector_candidates::HistoryBlend;
use serde::{Deserialize, Serialize};
use similarity_index::RankWeights;

/// Coefficients for comparing a similarity match against a fresh candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionBlend {
    pub similarity: f64,
    pub success_rate: f64,
}

impl DecisionBlend {
    pub fn score(&self, similarity: f64, success_rate: f64) -> f64 {
        similarity * self.similarity + success_rate * self.success_rate
    }
}

impl Default for DecisionBlend {
    fn default() -> Self {
        Self {
            similarity: 0.6,
            success_rate: 0.4,
        }
    }
}

/// Every similarity/success-rate blend used by the engine, in one place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendWeights {
    /// Generator: base score vs. recorded success rate
    pub history_blend: HistoryBlend,
    /// Similarity index ranking
    pub similarity_rank: RankWeights,
    /// Semantic match vs. fresh candidate comparison
    pub semantic_decision: DecisionBlend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Attempts before a selector statistic is trusted
    pub min_interactions_for_learning: u32,
    pub similarity_threshold: f64,
    pub success_rate_threshold: f64,
    /// Applications before a learned correction short-circuits resolution
    pub correction_min_applications: u32,
    pub similar_top_k: usize,
    pub retention_days: u32,
    pub enable_weight_adaptation: bool,
    pub blend: BlendWeights,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_interactions_for_learning: 3,
            similarity_threshold: 0.7,
            success_rate_threshold: 0.8,
            correction_min_applications: 2,
            similar_top_k: 3,
            retention_days: 30,
            enable_weight_adaptation: true,
            blend: BlendWeights::default(),
        }
    }
}
