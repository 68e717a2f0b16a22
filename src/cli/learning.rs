use anyhow::{Context, Result};
use clap::Args;
use decision_fusion::LearningStats;
use interaction_ledger::{CleanupReport, Session};
use tracing::info;

use super::context::CliContext;
use super::output::{emit, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct CleanupArgs {
    /// Age cut-off such as `7d` or `12h`; defaults to the configured retention
    #[arg(long, value_name = "DURATION")]
    pub older_than: Option<humantime::Duration>,
}

#[derive(Args, Clone, Debug)]
pub struct SessionsArgs {
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

pub async fn cmd_stats(ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let engine = ctx.engine().await?;
    let stats = engine.learning_stats()?;

    emit(output, &stats, |stats: &LearningStats| {
        let ledger = &stats.ledger;
        let index = &stats.index;
        println!("Ledger");
        println!("  sessions:            {}", ledger.total_sessions);
        println!(
            "  interactions:        {} ({:.1}% successful)",
            ledger.total_interactions,
            ledger.success_rate * 100.0
        );
        println!("  distinct elements:   {}", ledger.distinct_elements);
        println!("  tracked selectors:   {}", ledger.tracked_selectors);
        println!("  learned corrections: {}", ledger.correction_mappings);
        if !ledger.top_selectors.is_empty() {
            println!("  top selectors:");
            for stat in &ledger.top_selectors {
                println!(
                    "    {:>5.1}%  {:>4} uses  {}",
                    stat.success_rate * 100.0,
                    stat.attempts,
                    stat.selector
                );
            }
        }
        println!("Similarity index");
        println!("  entries:             {}", index.entries);
        println!("  pages:               {}", index.distinct_pages);
        println!(
            "  success rate:        {:.1}%",
            index.overall_success_rate * 100.0
        );
        println!(
            "  embeddings:          {} ({} dimensions)",
            index.provider, index.dimension
        );
        println!("Thresholds");
        println!("  similarity:          {:.2}", stats.similarity_threshold);
        println!("  success rate:        {:.2}", stats.success_rate_threshold);
        println!(
            "  min interactions:    {}",
            stats.min_interactions_for_learning
        );
    })
}

pub async fn cmd_cleanup(args: CleanupArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let engine = ctx.engine().await?;
    let report = match args.older_than {
        Some(age) => {
            let retention = chrono::Duration::from_std(*age).context("Cleanup age is too large")?;
            engine.ledger().cleanup_old_data(retention)?
        }
        None => engine.cleanup_old_data()?,
    };
    info!(
        interactions = report.interactions,
        snapshots = report.snapshots,
        sessions = report.sessions,
        "Cleanup finished"
    );

    emit(output, &report, |report: &CleanupReport| {
        println!(
            "Removed {} interactions, {} page snapshots and {} sessions",
            report.interactions, report.snapshots, report.sessions
        );
    })
}

pub async fn cmd_sessions(args: SessionsArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let engine = ctx.engine().await?;
    let sessions = engine.ledger().list_sessions(args.limit)?;

    emit(output, &sessions, |sessions: &Vec<Session>| {
        if sessions.is_empty() {
            println!("No sessions recorded");
            return;
        }
        for session in sessions {
            let status = if session.is_finished() { "done" } else { "open" };
            println!(
                "{}  {}  {}  ok={} failed={} corrected={}  {}",
                session.id,
                session.started_at.format("%Y-%m-%d %H:%M:%S"),
                status,
                session.successful_steps,
                session.failed_steps,
                session.corrected_steps,
                session.target_url
            );
        }
    })
}
