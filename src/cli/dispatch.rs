use super::config::cmd_config;
use super::decide::{cmd_decide, cmd_feedback, cmd_recommend};
use super::env::CliArgs;
use super::inspect::{cmd_candidates, cmd_fingerprint};
use super::learning::{cmd_cleanup, cmd_sessions, cmd_stats};
use super::parse::cmd_parse;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    let output = cli.output;
    match cli.command.clone() {
        Commands::Candidates(args) => cmd_candidates(args, output).await,
        Commands::Fingerprint(args) => cmd_fingerprint(args, output).await,
        Commands::Decide(args) => cmd_decide(args, ctx, output).await,
        Commands::Recommend(args) => cmd_recommend(args, ctx, output).await,
        Commands::Feedback(args) => cmd_feedback(args, ctx, output).await,
        Commands::Parse(args) => cmd_parse(args, ctx, output).await,
        Commands::Stats => cmd_stats(ctx, output).await,
        Commands::Cleanup(args) => cmd_cleanup(args, ctx, output).await,
        Commands::Sessions(args) => cmd_sessions(args, ctx, output).await,
        Commands::Config(args) => cmd_config(args, ctx, output).await,
    }
}
