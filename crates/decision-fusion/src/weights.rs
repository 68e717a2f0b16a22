//! Online adaptation of signal weights

use serde::{Deserialize, Serialize};

pub const MIN_WEIGHT: f64 = 0.1;
pub const MAX_WEIGHT: f64 = 0.5;
pub const LEARNING_RATE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightKey {
    HistoryMatch,
    SemanticSimilarity,
    TextMatch,
    PositionHeuristic,
}

impl WeightKey {
    pub const ALL: [WeightKey; 4] = [
        WeightKey::HistoryMatch,
        WeightKey::SemanticSimilarity,
        WeightKey::TextMatch,
        WeightKey::PositionHeuristic,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

/// Relative trust in each matching signal.
///
/// Always sums to 1 with every weight in `[MIN_WEIGHT, MAX_WEIGHT]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveWeights {
    pub history_match: f64,
    pub semantic_similarity: f64,
    pub text_match: f64,
    pub position_heuristic: f64,
}

impl Default for AdaptiveWeights {
    fn default() -> Self {
        Self {
            history_match: 0.4,
            semantic_similarity: 0.3,
            text_match: 0.2,
            position_heuristic: 0.1,
        }
    }
}

impl AdaptiveWeights {
    pub fn get(&self, key: WeightKey) -> f64 {
        self.to_array()[key.slot()]
    }

    pub fn sum(&self) -> f64 {
        self.to_array().iter().sum()
    }

    /// Move `key` one step toward (success) or away from (failure) trust,
    /// then renormalise.
    pub fn nudge(&mut self, key: WeightKey, success: bool) {
        let mut values = self.to_array();
        let slot = key.slot();
        values[slot] = if success {
            (values[slot] + LEARNING_RATE).min(MAX_WEIGHT)
        } else {
            (values[slot] - LEARNING_RATE).max(MIN_WEIGHT)
        };
        renormalize(&mut values);
        *self = Self::from_array(values);
    }

    fn to_array(self) -> [f64; 4] {
        [
            self.history_match,
            self.semantic_similarity,
            self.text_match,
            self.position_heuristic,
        ]
    }

    fn from_array(values: [f64; 4]) -> Self {
        Self {
            history_match: values[0],
            semantic_similarity: values[1],
            text_match: values[2],
            position_heuristic: values[3],
        }
    }
}

// Divide by the sum, clamp, then hand the residual to the weights in
// proportion to their remaining headroom. With four weights in [0.1, 0.5] the
// headroom always exceeds the residual, so one pass lands on a sum of 1.
fn renormalize(values: &mut [f64; 4]) {
    let sum: f64 = values.iter().sum();
    if sum > 0.0 {
        values.iter_mut().for_each(|v| *v /= sum);
    }
    values
        .iter_mut()
        .for_each(|v| *v = v.clamp(MIN_WEIGHT, MAX_WEIGHT));

    let residual = 1.0 - values.iter().sum::<f64>();
    if residual.abs() <= f64::EPSILON {
        return;
    }
    let headroom: Vec<f64> = values
        .iter()
        .map(|v| if residual > 0.0 { MAX_WEIGHT - v } else { v - MIN_WEIGHT })
        .collect();
    let total: f64 = headroom.iter().sum();
    if total <= 0.0 {
        return;
    }
    for (value, room) in values.iter_mut().zip(headroom) {
        *value = (*value + residual * room / total).clamp(MIN_WEIGHT, MAX_WEIGHT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariants(weights: &AdaptiveWeights) {
        assert!((weights.sum() - 1.0).abs() < 1e-9, "sum {}", weights.sum());
        for key in WeightKey::ALL {
            let w = weights.get(key);
            assert!(
                (MIN_WEIGHT - 1e-12..=MAX_WEIGHT + 1e-12).contains(&w),
                "{key:?} = {w}"
            );
        }
    }

    #[test]
    fn test_defaults_are_normalised() {
        assert_invariants(&AdaptiveWeights::default());
    }

    #[test]
    fn test_success_raises_weight() {
        let mut weights = AdaptiveWeights::default();
        weights.nudge(WeightKey::TextMatch, true);
        assert!(weights.text_match > 0.2);
        assert!(weights.history_match < 0.4);
        assert_invariants(&weights);
    }

    #[test]
    fn test_failure_lowers_weight() {
        let mut weights = AdaptiveWeights::default();
        weights.nudge(WeightKey::HistoryMatch, false);
        assert!(weights.history_match < 0.4);
        assert_invariants(&weights);
    }

    #[test]
    fn test_invariants_hold_under_long_sequences() {
        let mut weights = AdaptiveWeights::default();
        // Simple LCG so the sequence is varied but reproducible.
        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..5_000 {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let key = WeightKey::ALL[(state >> 33) as usize % 4];
            let success = (state >> 17) & 1 == 1;
            weights.nudge(key, success);
            assert_invariants(&weights);
        }
    }

    #[test]
    fn test_saturation_stays_in_bounds() {
        let mut weights = AdaptiveWeights::default();
        for _ in 0..500 {
            weights.nudge(WeightKey::SemanticSimilarity, true);
        }
        assert!((weights.semantic_similarity - MAX_WEIGHT).abs() < 1e-9);
        assert_invariants(&weights);

        for _ in 0..500 {
            weights.nudge(WeightKey::SemanticSimilarity, false);
        }
        assert!((weights.semantic_similarity - MIN_WEIGHT).abs() < 1e-9);
        assert_invariants(&weights);
    }
}
