//! Candidate ranking

use mender_core_types::{truncate_chars, ElementDescriptor};
use tracing::debug;

use crate::strategies::{class_selector_tokens, is_exact_text_selector, EXACT_TEXT_MAX_CHARS};
use crate::types::{HistoryBlend, SelectorCandidate, SelectorHistory, SelectorStrategy};

/// Score multiplier for selectors that match several page elements.
pub const NON_UNIQUE_PENALTY: f64 = 0.8;

/// Stateless generator of ranked selector candidates.
#[derive(Debug, Clone, Default)]
pub struct CandidateGenerator {
    blend: HistoryBlend,
}

impl CandidateGenerator {
    /// Create a generator with the default 0.7/0.3 history blend
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom history blend coefficients
    pub fn with_blend(mut self, blend: HistoryBlend) -> Self {
        self.blend = blend;
        self
    }

    pub fn blend(&self) -> HistoryBlend {
        self.blend
    }

    /// Generate candidates ordered by descending score.
    ///
    /// `page_elements` enables the uniqueness check for text and class
    /// selectors. `history` blends recorded success rates into the score.
    pub fn generate(
        &self,
        element: &ElementDescriptor,
        page_elements: Option<&[ElementDescriptor]>,
        history: Option<&SelectorHistory>,
    ) -> Vec<SelectorCandidate> {
        let mut candidates: Vec<SelectorCandidate> = SelectorStrategy::ALL
            .iter()
            .filter_map(|strategy| strategy.evaluate(element))
            .collect();

        if let Some(page) = page_elements {
            for candidate in candidates
                .iter_mut()
                .filter(|c| c.strategy.needs_uniqueness_check())
            {
                let matches = count_matches(element, candidate, page);
                candidate.match_count = Some(matches);
                if matches > 1 {
                    candidate.is_unique = false;
                    candidate.score *= NON_UNIQUE_PENALTY;
                }
            }
        }

        if let Some(history) = history {
            for candidate in candidates.iter_mut() {
                if let Some(entry) = history.get(&candidate.selector) {
                    candidate.stability_score = entry.success_rate;
                    candidate.score = self.blend.apply(candidate.score, entry.success_rate);
                }
            }
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        debug!(
            tag = %element.tag_name,
            count = candidates.len(),
            top = candidates.first().map(|c| c.selector.as_str()).unwrap_or(""),
            "generated selector candidates"
        );
        candidates
    }

    /// Top-ranked candidate without page or history context.
    pub fn best_selector(&self, element: &ElementDescriptor) -> Option<SelectorCandidate> {
        self.generate(element, None, None).into_iter().next()
    }
}

fn count_matches(
    element: &ElementDescriptor,
    candidate: &SelectorCandidate,
    page: &[ElementDescriptor],
) -> usize {
    match candidate.strategy {
        SelectorStrategy::Text => {
            let text = element.trimmed_text();
            if is_exact_text_selector(&candidate.selector) {
                page.iter().filter(|e| e.trimmed_text() == text).count()
            } else {
                let prefix = truncate_chars(text, EXACT_TEXT_MAX_CHARS).trim_end();
                page.iter()
                    .filter(|e| e.trimmed_text().contains(prefix))
                    .count()
            }
        }
        SelectorStrategy::CssClass => {
            let wanted = class_selector_tokens(&candidate.selector);
            page.iter()
                .filter(|e| {
                    let tokens = e.class_tokens();
                    wanted.iter().all(|w| tokens.contains(w))
                })
                .count()
        }
        _ => 1,
    }
}
