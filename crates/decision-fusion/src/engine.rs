//! The selector engine

use std::sync::Arc;

use chrono::Utc;
use interaction_ledger::{
    CleanupReport, Interaction, InteractionLedger, LedgerStats, PageSnapshot, Session,
};
use mender_core_types::{
    truncate_chars, ElementContext, ElementDescriptor, Fingerprint, Outcome, SessionId,
};
use parking_lot::Mutex;
use selector_candidates::{CandidateGenerator, HistoryEntry, SelectorHistory};
use serde::{Deserialize, Serialize};
use similarity_index::{IndexStats, SimilarElement, SimilarityIndex};
use tracing::{debug, info, warn};

use crate::config::LearningConfig;
use crate::decision::{
    Alternative, DecisionSource, Recommendation, SelectorDecision, WeightedMatch,
    CORRECTION_CONFIDENCE, FALLBACK_CONFIDENCE,
};
use crate::errors::{FusionError, FusionResult};
use crate::weights::{AdaptiveWeights, WeightKey};

const FALLBACK_TEXT_CHARS: usize = 30;
const RUNNER_UP_COUNT: usize = 3;

/// What happened when a step used a selector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub selector: String,
    pub strategy: String,
    /// Decision source that proposed the selector, if it came from the engine
    pub source: Option<DecisionSource>,
    pub step_text: String,
    pub action_type: String,
    pub action_value: Option<String>,
    pub duration_ms: u64,
    pub retries: u32,
    pub selectors_tried: Vec<String>,
    pub confidence: f64,
}

impl StepOutcome {
    pub fn new(selector: impl Into<String>, step_text: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            step_text: step_text.into(),
            ..Default::default()
        }
    }

    /// Carry over selector, strategy, source and confidence from a decision.
    pub fn from_decision(decision: &SelectorDecision, step_text: impl Into<String>) -> Self {
        Self {
            selector: decision.selector.clone(),
            strategy: decision.strategy.clone(),
            source: Some(decision.source),
            step_text: step_text.into(),
            confidence: decision.confidence,
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    pub fn with_source(mut self, source: DecisionSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_action(mut self, action_type: impl Into<String>, value: Option<String>) -> Self {
        self.action_type = action_type.into();
        self.action_value = value;
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
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningStats {
    pub ledger: LedgerStats,
    pub index: IndexStats,
    pub weights: AdaptiveWeights,
    pub similarity_threshold: f64,
    pub success_rate_threshold: f64,
    pub min_interactions_for_learning: u32,
    pub active_session: Option<Session>,
}

/// Combines the ledger, the similarity index and the candidate generator.
///
/// All mutable state (weights, active session) is owned by the instance.
pub struct SelectorEngine {
    ledger: Arc<InteractionLedger>,
    index: Arc<SimilarityIndex>,
    generator: CandidateGenerator,
    config: LearningConfig,
    weights: Mutex<AdaptiveWeights>,
    session: Mutex<Option<Session>>,
}

impl SelectorEngine {
    pub fn new(
        ledger: Arc<InteractionLedger>,
        index: Arc<SimilarityIndex>,
        config: LearningConfig,
    ) -> Self {
        Self {
            ledger,
            index,
            generator: CandidateGenerator::new().with_blend(config.blend.history_blend),
            config,
            weights: Mutex::new(AdaptiveWeights::default()),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<InteractionLedger> {
        &self.ledger
    }

    pub fn index(&self) -> &Arc<SimilarityIndex> {
        &self.index
    }

    pub fn weights(&self) -> AdaptiveWeights {
        *self.weights.lock()
    }

    // ---- decisions ----

    /// Pick a selector for `context` without page-wide uniqueness data.
    pub async fn decide_selector(
        &self,
        context: &ElementContext,
        step_text: &str,
    ) -> SelectorDecision {
        self.decide_selector_on_page(context, step_text, None).await
    }

    /// Pick a selector for `context`.
    ///
    /// Priority: learned correction, trusted history, similarity match vs.
    /// fresh candidate, best runner-up, generic text fallback. Performs no
    /// writes; storage failures count as missing data.
    ///
    /// The success-rate threshold only filters similar elements offered as
    /// alternatives; the comparison against the top candidate sees every
    /// similar element, with low success rates pulling its blended score down.
    pub async fn decide_selector_on_page(
        &self,
        context: &ElementContext,
        step_text: &str,
        page_elements: Option<&[ElementDescriptor]>,
    ) -> SelectorDecision {
        let element = &context.element;
        let fingerprint = Fingerprint::of(element);
        let threshold = self.config.success_rate_threshold;
        let mut alternatives = Vec::new();

        let page_url = Some(context.page_url.as_str()).filter(|url| !url.is_empty());
        match self.ledger.find_correction(step_text, page_url) {
            Ok(Some(correction))
                if correction.times_applied >= self.config.correction_min_applications =>
            {
                debug!(
                    step = step_text,
                    selector = %correction.corrected_selector,
                    times_applied = correction.times_applied,
                    "Using learned correction"
                );
                return SelectorDecision::new(
                    correction.corrected_selector,
                    "correction",
                    CORRECTION_CONFIDENCE,
                    DecisionSource::LearnedCorrection,
                );
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Correction lookup failed; ignoring"),
        }

        match self
            .ledger
            .best_selector(&fingerprint, self.config.min_interactions_for_learning)
        {
            Ok(Some(stat)) if stat.success_rate >= threshold => {
                debug!(fingerprint = %fingerprint, selector = %stat.selector, "Using selector history");
                return SelectorDecision::new(
                    stat.selector,
                    "historical",
                    stat.success_rate,
                    DecisionSource::History,
                );
            }
            Ok(Some(stat)) => alternatives.push(Alternative::new(
                stat.selector,
                stat.success_rate,
                DecisionSource::History,
            )),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Selector history lookup failed; ignoring"),
        }

        let similar = self.similar_elements(context).await;
        alternatives.extend(
            similar
                .iter()
                .filter(|s| s.success_rate >= threshold)
                .map(|s| {
                    Alternative::new(
                        s.selector.clone(),
                        s.similarity * s.success_rate,
                        DecisionSource::SemanticMatch,
                    )
                }),
        );

        let history = self.selector_history(&fingerprint);
        let candidates = self
            .generator
            .generate(element, page_elements, Some(&history));

        if let Some(best) = candidates.first() {
            let blend = self.config.blend.semantic_decision;
            let best_semantic = similar
                .iter()
                .map(|s| (s, blend.score(s.similarity, s.success_rate)))
                .max_by(|a, b| a.1.total_cmp(&b.1));

            if let Some((semantic, score)) = best_semantic {
                if score > best.score {
                    let runners_up = candidates
                        .iter()
                        .take(RUNNER_UP_COUNT)
                        .map(|c| Alternative::new(c.selector.clone(), c.score, DecisionSource::Generated))
                        .collect();
                    return SelectorDecision::new(
                        semantic.selector.clone(),
                        "semantic",
                        score,
                        DecisionSource::SemanticMatch,
                    )
                    .with_alternatives(runners_up);
                }
            }

            let mut runners_up: Vec<Alternative> = candidates
                .iter()
                .skip(1)
                .take(RUNNER_UP_COUNT)
                .map(|c| Alternative::new(c.selector.clone(), c.score, DecisionSource::Generated))
                .collect();
            runners_up.extend(alternatives);
            return SelectorDecision::new(
                best.selector.clone(),
                best.strategy.name(),
                best.score,
                DecisionSource::Generated,
            )
            .with_alternatives(runners_up);
        }

        if let Some(best) = alternatives
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .cloned()
        {
            return SelectorDecision::new(
                best.selector,
                "fallback",
                best.score,
                DecisionSource::Alternative,
            )
            .with_alternatives(alternatives);
        }

        fallback_decision(element)
    }

    /// Adaptive matcher: history, similarity and text signals scaled by the
    /// current weights; the most confident candidate wins.
    pub async fn weighted_match(&self, context: &ElementContext) -> Option<WeightedMatch> {
        let weights = self.weights();
        let element = &context.element;
        let mut matches = Vec::new();

        match self.ledger.selector_history(&Fingerprint::of(element)) {
            Ok(history) => {
                if let Some(best) = history.first() {
                    matches.push(WeightedMatch {
                        selector: best.selector.clone(),
                        confidence: best.success_rate * weights.history_match,
                        signal: WeightKey::HistoryMatch,
                    });
                }
            }
            Err(err) => warn!(error = %err, "Selector history lookup failed; ignoring"),
        }

        for similar in self.similar_elements(context).await {
            matches.push(WeightedMatch {
                confidence: similar.similarity * similar.success_rate * weights.semantic_similarity,
                selector: similar.selector,
                signal: WeightKey::SemanticSimilarity,
            });
        }

        let text = element.trimmed_text();
        if !text.is_empty() {
            let tag = Some(element.tag_name.as_str()).filter(|t| !t.is_empty());
            match self.index.find_by_text(text, tag, RUNNER_UP_COUNT) {
                Ok(hits) => matches.extend(hits.into_iter().map(|hit| WeightedMatch {
                    confidence: hit.success_rate * weights.text_match,
                    selector: hit.selector,
                    signal: WeightKey::TextMatch,
                })),
                Err(err) => warn!(error = %err, "Text lookup failed; ignoring"),
            }
        }

        matches
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    /// Generated candidates and similarity matches in one ranked listing.
    pub async fn selector_recommendations(
        &self,
        context: &ElementContext,
        top_k: usize,
    ) -> Vec<Recommendation> {
        let history = self.selector_history(&Fingerprint::of(&context.element));
        let mut recommendations: Vec<Recommendation> = self
            .generator
            .generate(&context.element, None, Some(&history))
            .into_iter()
            .take(top_k)
            .map(|c| Recommendation {
                strategy: c.strategy.name().to_string(),
                score: c.score,
                source: DecisionSource::Generated,
                reference: Some(c.reference),
                similar_text: None,
                selector: c.selector,
            })
            .collect();

        recommendations.extend(self.similar_elements(context).await.into_iter().map(|s| {
            Recommendation {
                strategy: "semantic_match".to_string(),
                score: s.similarity * s.success_rate,
                source: DecisionSource::SemanticMatch,
                reference: None,
                similar_text: Some(s.text),
                selector: s.selector,
            }
        }));

        recommendations.sort_by(|a, b| b.score.total_cmp(&a.score));
        recommendations.truncate(top_k);
        recommendations
    }

    async fn similar_elements(&self, context: &ElementContext) -> Vec<SimilarElement> {
        if context.element.is_empty() {
            return Vec::new();
        }
        match self
            .index
            .find_similar(
                context,
                self.config.similar_top_k,
                self.config.similarity_threshold,
                false,
            )
            .await
        {
            Ok(similar) => similar,
            Err(err) => {
                warn!(error = %err, "Similarity query failed; ignoring");
                Vec::new()
            }
        }
    }

    fn selector_history(&self, fingerprint: &Fingerprint) -> SelectorHistory {
        match self.ledger.selector_history(fingerprint) {
            Ok(stats) => stats
                .into_iter()
                .map(|stat| {
                    (
                        stat.selector,
                        HistoryEntry {
                            attempts: stat.attempts,
                            success_rate: stat.success_rate,
                        },
                    )
                })
                .collect(),
            Err(err) => {
                warn!(error = %err, fingerprint = %fingerprint, "Selector history lookup failed; ignoring");
                SelectorHistory::new()
            }
        }
    }

    // ---- outcomes ----

    pub async fn record_success(
        &self,
        context: &ElementContext,
        outcome: StepOutcome,
    ) -> FusionResult<Interaction> {
        self.record(context, outcome, Outcome::Success, None, None)
            .await
    }

    pub async fn record_failure(
        &self,
        context: &ElementContext,
        outcome: StepOutcome,
        error: &str,
    ) -> FusionResult<Interaction> {
        self.record(context, outcome, Outcome::Failure, Some(error), None)
            .await
    }

    /// Record that `outcome.selector` worked after a human correction.
    ///
    /// Repeating the same correction for the same step increments the learned
    /// mapping until it short-circuits future decisions.
    pub async fn record_correction(
        &self,
        context: &ElementContext,
        outcome: StepOutcome,
        user_correction: &str,
    ) -> FusionResult<Interaction> {
        self.record(context, outcome, Outcome::Corrected, None, Some(user_correction))
            .await
    }

    /// Write the interaction, then feed the index, the weights and the
    /// session counters. A ledger failure is returned after the rest ran.
    async fn record(
        &self,
        context: &ElementContext,
        outcome: StepOutcome,
        result: Outcome,
        error: Option<&str>,
        correction: Option<&str>,
    ) -> FusionResult<Interaction> {
        let mut interaction = Interaction::new(
            &context.element,
            outcome.selector.clone(),
            outcome.step_text.clone(),
            result,
        )
        .with_strategy(outcome.strategy.clone())
        .with_page(context.page_url.clone(), context.page_title.clone())
        .with_action(outcome.action_type.clone(), outcome.action_value.clone())
        .with_duration(outcome.duration_ms)
        .with_retries(outcome.retries)
        .with_selectors_tried(outcome.selectors_tried.clone())
        .with_confidence(outcome.confidence);
        if let Some(error) = error {
            interaction = interaction.with_error(error);
        }
        if let Some(correction) = correction {
            interaction = interaction.with_correction(correction, Some(outcome.selector.clone()));
        }

        let session_id = self.session.lock().as_ref().map(|s| s.id.clone());
        let stored = self
            .ledger
            .record_interaction(&interaction, session_id.as_ref());
        if let Err(err) = &stored {
            warn!(error = %err, fingerprint = %interaction.fingerprint, "Failed to store interaction");
        }

        if let Some(session) = self.session.lock().as_mut() {
            session.count_outcome(result);
        }

        self.update_index(context, &interaction).await;

        if self.config.enable_weight_adaptation {
            if let Some(key) = outcome
                .source
                .and_then(|source| source.weight_key(&outcome.strategy))
            {
                self.weights.lock().nudge(key, result.is_success());
            }
        }

        stored?;
        Ok(interaction)
    }

    async fn update_index(&self, context: &ElementContext, interaction: &Interaction) {
        if context.element.is_empty() || interaction.selector_used.is_empty() {
            return;
        }
        let success = interaction.outcome.is_success();
        // Only a working selector may become the entry's selector.
        let indexed = if success {
            self.index
                .index_element(context, &interaction.selector_used)
                .await
        } else {
            self.index
                .index_if_absent(context, &interaction.selector_used)
                .await
        };
        if let Err(err) = indexed {
            warn!(error = %err, "Failed to index element");
            return;
        }
        if let Err(err) = self.index.record_outcome(&interaction.fingerprint, success) {
            warn!(error = %err, "Failed to record similarity outcome");
        }
    }

    // ---- sessions ----

    pub fn start_session(&self, target_url: &str, steps: Vec<String>) -> SessionId {
        let session = Session::new(target_url, steps);
        if let Err(err) = self.ledger.create_session(&session) {
            warn!(error = %err, "Failed to persist session start");
        }
        let id = session.id.clone();
        if let Some(previous) = self.session.lock().replace(session) {
            warn!(previous = %previous.id, "Replacing an unfinished session");
        }
        info!(session_id = %id, target_url, "Session started");
        id
    }

    /// Finalise the active session with its generated artifact.
    pub fn end_session(&self, artifact: Option<String>) -> FusionResult<Session> {
        let mut session = self
            .session
            .lock()
            .take()
            .ok_or(FusionError::NoActiveSession)?;
        session.ended_at = Some(Utc::now());
        session.artifact = artifact;
        if let Err(err) = self.ledger.update_session(&session) {
            warn!(error = %err, session_id = %session.id, "Failed to persist session end");
        }
        info!(
            session_id = %session.id,
            successful = session.successful_steps,
            failed = session.failed_steps,
            corrected = session.corrected_steps,
            "Session finished"
        );
        Ok(session)
    }

    pub fn current_session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn save_page_snapshot(
        &self,
        step_index: usize,
        page_url: &str,
        dom_snapshot: String,
        screenshot_base64: Option<String>,
    ) -> FusionResult<()> {
        let session_id = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.id.clone())
            .ok_or(FusionError::NoActiveSession)?;
        self.ledger.save_page_snapshot(&PageSnapshot {
            session_id,
            step_index,
            page_url: page_url.to_string(),
            dom_snapshot,
            screenshot_base64,
            taken_at: Utc::now(),
        })?;
        Ok(())
    }

    // ---- maintenance ----

    pub fn learning_stats(&self) -> FusionResult<LearningStats> {
        Ok(LearningStats {
            ledger: self.ledger.stats()?,
            index: self.index.stats()?,
            weights: self.weights(),
            similarity_threshold: self.config.similarity_threshold,
            success_rate_threshold: self.config.success_rate_threshold,
            min_interactions_for_learning: self.config.min_interactions_for_learning,
            active_session: self.current_session(),
        })
    }

    /// Apply the configured retention window to the ledger.
    pub fn cleanup_old_data(&self) -> FusionResult<CleanupReport> {
        let retention = chrono::Duration::days(i64::from(self.config.retention_days));
        Ok(self.ledger.cleanup_old_data(retention)?)
    }
}

/// `tag:has-text("...")` on the first 30 characters of text, or the bare tag.
fn fallback_decision(element: &ElementDescriptor) -> SelectorDecision {
    let tag = match element.tag_name.trim() {
        "" => "element",
        tag => tag,
    };
    let text = truncate_chars(element.trimmed_text(), FALLBACK_TEXT_CHARS).trim_end();
    let selector = if text.is_empty() {
        tag.to_string()
    } else {
        format!("{tag}:has-text(\"{}\")", text.replace('"', "\\\""))
    };
    SelectorDecision::new(
        selector,
        "text_fallback",
        FALLBACK_CONFIDENCE,
        DecisionSource::Fallback,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use similarity_index::HashEmbeddingProvider;

    fn engine() -> SelectorEngine {
        let ledger = Arc::new(InteractionLedger::in_memory().unwrap());
        let index = Arc::new(
            SimilarityIndex::in_memory(Arc::new(HashEmbeddingProvider::default())).unwrap(),
        );
        SelectorEngine::new(ledger, index, LearningConfig::default())
    }

    fn context(element: ElementDescriptor) -> ElementContext {
        ElementContext::new(element, "https://example.com/login", "Login")
    }

    fn login_button() -> ElementDescriptor {
        ElementDescriptor::new("button")
            .with_text("Login")
            .with_attr("data-testid", "login-btn")
    }

    #[tokio::test]
    async fn test_fresh_element_uses_generated_candidate() {
        let engine = engine();
        let decision = engine
            .decide_selector(&context(login_button()), "Click the Login button")
            .await;
        assert_eq!(decision.source, DecisionSource::Generated);
        assert_eq!(decision.selector, "[data-testid=\"login-btn\"]");
        assert_eq!(decision.strategy, "test_id");
        assert!(decision.confidence >= 0.95);
        assert!(!decision.alternatives.is_empty());
    }

    #[tokio::test]
    async fn test_correction_short_circuits_after_two_applications() {
        let engine = engine();
        let ctx = context(login_button());
        let step = "Click the Login button";
        let corrected = StepOutcome::new("text=\"Sign In\"", step).with_action("click", None);

        engine
            .record_correction(&ctx, corrected.clone(), "click the Sign In button")
            .await
            .unwrap();
        let once = engine.decide_selector(&ctx, step).await;
        assert_ne!(once.source, DecisionSource::LearnedCorrection);

        engine
            .record_correction(&ctx, corrected, "click the Sign In button")
            .await
            .unwrap();
        let twice = engine.decide_selector(&ctx, step).await;
        assert_eq!(twice.source, DecisionSource::LearnedCorrection);
        assert_eq!(twice.selector, "text=\"Sign In\"");
        assert_eq!(twice.confidence, CORRECTION_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_trusted_history_wins() {
        let engine = engine();
        let ctx = context(login_button());
        for _ in 0..3 {
            engine
                .record_success(&ctx, StepOutcome::new("#login", "press login"))
                .await
                .unwrap();
        }
        let decision = engine.decide_selector(&ctx, "Click the Login button").await;
        assert_eq!(decision.source, DecisionSource::History);
        assert_eq!(decision.selector, "#login");
        assert_eq!(decision.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_similar_element_beats_weak_candidates() {
        let engine = engine();
        let seen = ElementDescriptor::new("button")
            .with_text("Buy")
            .with_attr("id", "buy-1");
        engine
            .record_success(&context(seen), StepOutcome::new("#buy-1", "buy"))
            .await
            .unwrap();

        // Same description, different fingerprint.
        let renamed = ElementDescriptor::new("button")
            .with_text("Buy")
            .with_attr("id", "buy-2");
        let decision = engine.decide_selector(&context(renamed), "buy").await;
        assert_eq!(decision.source, DecisionSource::SemanticMatch);
        assert_eq!(decision.selector, "#buy-1");
        assert!((decision.confidence - 1.0).abs() < 1e-6);
        assert_eq!(decision.alternatives.len(), 3);
    }

    #[tokio::test]
    async fn test_rate_threshold_only_filters_alternatives() {
        let engine = engine();
        let seen = ElementDescriptor::new("button")
            .with_text("Buy")
            .with_attr("id", "buy-1");
        let renamed = ElementDescriptor::new("button")
            .with_text("Buy")
            .with_attr("id", "buy-2");
        for _ in 0..7 {
            engine
                .record_success(&context(seen.clone()), StepOutcome::new("#buy-1", "buy"))
                .await
                .unwrap();
        }
        for _ in 0..2 {
            engine
                .record_failure(&context(seen.clone()), StepOutcome::new("#buy-1", "buy"), "covered")
                .await
                .unwrap();
        }

        // 7/9 is under the 0.8 threshold, yet 0.6 + 0.4 * 7/9 beats role_name's 0.9.
        let decision = engine.decide_selector(&context(renamed.clone()), "buy").await;
        assert_eq!(decision.source, DecisionSource::SemanticMatch);
        assert_eq!(decision.selector, "#buy-1");
        assert!((decision.confidence - (0.6 + 0.4 * 7.0 / 9.0)).abs() < 1e-6);

        for _ in 0..5 {
            engine
                .record_failure(&context(seen.clone()), StepOutcome::new("#buy-1", "buy"), "covered")
                .await
                .unwrap();
        }
        let decision = engine.decide_selector(&context(renamed), "buy").await;
        assert_eq!(decision.source, DecisionSource::Generated);
        assert!(decision.alternatives.iter().all(|a| a.selector != "#buy-1"));
    }

    #[tokio::test]
    async fn test_untrusted_history_becomes_alternative() {
        let engine = engine();
        let ctx = context(ElementDescriptor::new("div"));
        for _ in 0..3 {
            engine
                .record_failure(&ctx, StepOutcome::new(".box", "open box"), "not visible")
                .await
                .unwrap();
        }
        let decision = engine.decide_selector(&ctx, "open box").await;
        assert_eq!(decision.source, DecisionSource::Alternative);
        assert_eq!(decision.selector, ".box");
        assert_eq!(decision.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_last_resort_fallback() {
        let engine = engine();
        let decision = engine
            .decide_selector(&context(ElementDescriptor::new("span")), "look")
            .await;
        assert_eq!(decision.source, DecisionSource::Fallback);
        assert_eq!(decision.selector, "span");
        assert_eq!(decision.confidence, FALLBACK_CONFIDENCE);

        let empty = engine
            .decide_selector(&ElementContext::default(), "look")
            .await;
        assert_eq!(empty.selector, "element");
    }

    #[test]
    fn test_fallback_quotes_text() {
        let element = ElementDescriptor::new("")
            .with_text("Say \"hi\" to everyone in the room right now");
        let decision = fallback_decision(&element);
        assert_eq!(
            decision.selector,
            "element:has-text(\"Say \\\"hi\\\" to everyone in the ro\")"
        );
    }

    #[tokio::test]
    async fn test_decisions_are_idempotent() {
        let engine = engine();
        let ctx = context(login_button());
        engine
            .record_success(&ctx, StepOutcome::new("#login", "press login"))
            .await
            .unwrap();
        let first = engine.decide_selector(&ctx, "press login").await;
        let second = engine.decide_selector(&ctx, "press login").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_outcomes_adapt_weights() {
        let engine = engine();
        let ctx = context(login_button());
        let outcome = StepOutcome::new("text=\"Login\"", "click login")
            .with_strategy("text")
            .with_source(DecisionSource::Generated);
        engine.record_success(&ctx, outcome).await.unwrap();
        assert!(engine.weights().text_match > 0.2);

        let untracked = StepOutcome::new("#login", "click login")
            .with_source(DecisionSource::LearnedCorrection);
        let before = engine.weights();
        engine.record_success(&ctx, untracked).await.unwrap();
        assert_eq!(engine.weights(), before);
    }

    #[tokio::test]
    async fn test_session_lifecycle_counts_outcomes() {
        let engine = engine();
        let ctx = context(login_button());
        let id = engine.start_session("https://example.com", vec!["a".into(), "b".into()]);

        engine
            .record_success(&ctx, StepOutcome::new("#login", "a"))
            .await
            .unwrap();
        engine
            .record_failure(&ctx, StepOutcome::new("#gone", "b"), "locator not found")
            .await
            .unwrap();
        engine
            .save_page_snapshot(1, "https://example.com", "<html/>".into(), None)
            .unwrap();

        let session = engine.end_session(Some("artifact".into())).unwrap();
        assert_eq!(session.id, id);
        assert_eq!((session.successful_steps, session.failed_steps), (1, 1));
        assert!(engine.current_session().is_none());
        assert!(matches!(
            engine.end_session(None),
            Err(FusionError::NoActiveSession)
        ));

        let stored = engine.ledger().get_session(&id).unwrap().unwrap();
        assert_eq!(stored.artifact.as_deref(), Some("artifact"));
        assert_eq!(engine.ledger().get_session_interactions(&id).unwrap().len(), 2);
        assert_eq!(engine.ledger().page_snapshots(&id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_do_not_repoint_index() {
        let engine = engine();
        let ctx = context(login_button());
        engine
            .record_success(&ctx, StepOutcome::new("#login", "a"))
            .await
            .unwrap();
        engine
            .record_failure(&ctx, StepOutcome::new("#broken", "a"), "detached")
            .await
            .unwrap();

        let hits = engine.index().find_by_text("Login", None, 5).unwrap();
        assert_eq!(hits[0].selector, "#login");
        assert!((hits[0].success_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failure_on_unseen_element_is_counted() {
        let engine = engine();
        let ctx = context(ElementDescriptor::new("button").with_text("Pay"));
        engine
            .record_failure(&ctx, StepOutcome::new("text=\"Pay\"", "pay"), "detached")
            .await
            .unwrap();
        let stats = engine.index().stats().unwrap();
        assert_eq!((stats.entries, stats.total_failures), (1, 1));

        engine
            .record_success(&ctx, StepOutcome::new("button:has-text(\"Pay\")", "pay"))
            .await
            .unwrap();
        let hits = engine.index().find_by_text("Pay", Some("button"), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].selector, "button:has-text(\"Pay\")");
        assert!((hits[0].success_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_recommendations_and_weighted_match() {
        let engine = engine();
        let ctx = context(login_button());
        engine
            .record_success(&ctx, StepOutcome::new("[data-testid=\"login-btn\"]", "a"))
            .await
            .unwrap();

        let recommendations = engine.selector_recommendations(&ctx, 3).await;
        assert_eq!(recommendations.len(), 3);
        assert!(recommendations
            .windows(2)
            .all(|pair| pair[0].score >= pair[1].score));

        let matched = engine.weighted_match(&ctx).await.unwrap();
        assert_eq!(matched.selector, "[data-testid=\"login-btn\"]");
        assert_eq!(matched.signal, WeightKey::HistoryMatch);
    }
}
