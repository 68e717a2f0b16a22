use anyhow::Result;
use clap::{Args, ValueEnum};
use decision_fusion::{Recommendation, SelectorDecision, StepOutcome};
use interaction_ledger::Interaction;
use mender_core_types::{ElementContext, ElementDescriptor};
use selector_candidates::CandidateGenerator;
use tracing::info;

use super::context::CliContext;
use super::element::read_element;
use super::output::{emit, OutputFormat};

const MANUAL_STRATEGY: &str = "manual";

#[derive(Args, Clone, Debug)]
pub struct PageArgs {
    /// URL of the page the element was found on
    #[arg(long, default_value = "")]
    pub url: String,

    /// Title of the page the element was found on
    #[arg(long, default_value = "")]
    pub title: String,
}

#[derive(Args, Clone, Debug)]
pub struct DecideArgs {
    /// Element JSON, or @path to a JSON file
    #[arg(value_name = "ELEMENT_JSON|@FILE")]
    pub element: String,

    /// Step text the element is resolved for
    #[arg(long)]
    pub step: String,

    #[command(flatten)]
    pub page: PageArgs,
}

#[derive(Args, Clone, Debug)]
pub struct RecommendArgs {
    /// Element JSON, or @path to a JSON file
    #[arg(value_name = "ELEMENT_JSON|@FILE")]
    pub element: String,

    #[arg(long, default_value_t = 5)]
    pub top_k: usize,

    #[command(flatten)]
    pub page: PageArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FeedbackOutcome {
    Success,
    Failure,
}

#[derive(Args, Clone, Debug)]
pub struct FeedbackArgs {
    /// Element JSON, or @path to a JSON file
    #[arg(value_name = "ELEMENT_JSON|@FILE")]
    pub element: String,

    /// Selector that was used
    #[arg(long)]
    pub selector: String,

    /// Step text the selector was used for
    #[arg(long)]
    pub step: String,

    #[arg(long, value_enum)]
    pub outcome: FeedbackOutcome,

    /// Strategy name; inferred from the generated candidates when omitted
    #[arg(long)]
    pub strategy: Option<String>,

    /// Error message for a failed attempt
    #[arg(long)]
    pub error: Option<String>,

    #[command(flatten)]
    pub page: PageArgs,
}

fn element_context(element: ElementDescriptor, page: &PageArgs) -> ElementContext {
    ElementContext::new(element, page.url.clone(), page.title.clone())
}

pub async fn cmd_decide(args: DecideArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let element = read_element(&args.element).await?;
    let context = element_context(element, &args.page);
    let engine = ctx.engine().await?;
    let decision = engine.decide_selector(&context, &args.step).await;

    emit(output, &decision, |decision: &SelectorDecision| {
        println!("{}", decision.selector);
        println!(
            "  strategy: {}  source: {}  confidence: {:.2}",
            decision.strategy,
            decision.source.as_str(),
            decision.confidence
        );
        if !decision.alternatives.is_empty() {
            println!("  alternatives:");
            for alternative in &decision.alternatives {
                println!(
                    "    {:.3}  {:<18} {}",
                    alternative.score,
                    alternative.source.as_str(),
                    alternative.selector
                );
            }
        }
    })
}

pub async fn cmd_recommend(
    args: RecommendArgs,
    ctx: &CliContext,
    output: OutputFormat,
) -> Result<()> {
    let element = read_element(&args.element).await?;
    let context = element_context(element, &args.page);
    let engine = ctx.engine().await?;
    let recommendations = engine
        .selector_recommendations(&context, args.top_k.max(1))
        .await;

    emit(output, &recommendations, |recommendations: &Vec<Recommendation>| {
        for (rank, rec) in recommendations.iter().enumerate() {
            let note = match (&rec.reference, &rec.similar_text) {
                (Some(reference), _) => format!("  [{}]", reference),
                (None, Some(text)) => format!("  (like \"{}\")", text),
                (None, None) => String::new(),
            };
            println!(
                "{:>2}. {:.3}  {:<14} {}{}",
                rank + 1,
                rec.score,
                rec.strategy,
                rec.selector,
                note
            );
        }
    })
}

pub async fn cmd_feedback(
    args: FeedbackArgs,
    ctx: &CliContext,
    output: OutputFormat,
) -> Result<()> {
    let element = read_element(&args.element).await?;
    let strategy = args
        .strategy
        .clone()
        .unwrap_or_else(|| infer_strategy(&element, &args.selector));
    let context = element_context(element, &args.page);
    let engine = ctx.engine().await?;

    let outcome = StepOutcome::new(args.selector.clone(), args.step.clone())
        .with_strategy(strategy)
        .with_action("feedback", None);
    let interaction = match args.outcome {
        FeedbackOutcome::Success => engine.record_success(&context, outcome).await?,
        FeedbackOutcome::Failure => {
            let error = args.error.as_deref().unwrap_or("reported by user");
            engine.record_failure(&context, outcome, error).await?
        }
    };
    info!(
        fingerprint = %interaction.fingerprint,
        outcome = %interaction.outcome,
        "Recorded feedback"
    );

    emit(output, &interaction, |interaction: &Interaction| {
        println!(
            "Recorded {} for {} (element {})",
            interaction.outcome, interaction.selector_used, interaction.fingerprint
        );
    })
}

/// Strategy of the generated candidate with the same selector, if any.
fn infer_strategy(element: &ElementDescriptor, selector: &str) -> String {
    CandidateGenerator::new()
        .generate(element, None, None)
        .into_iter()
        .find(|candidate| candidate.selector == selector)
        .map(|candidate| candidate.strategy.name().to_string())
        .unwrap_or_else(|| MANUAL_STRATEGY.to_string())
}
