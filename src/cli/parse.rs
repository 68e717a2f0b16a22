use anyhow::Result;
use clap::Args;
use live_executor::{ParsedAction, StepParser};

use super::context::CliContext;
use super::output::{emit, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct ParseArgs {
    /// Step text, e.g. "Click the Sign In button"
    pub step: String,

    /// Only apply the built-in rules, even when a completion service is configured
    #[arg(long)]
    pub rules_only: bool,
}

pub async fn cmd_parse(args: ParseArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let action = if args.rules_only {
        StepParser::parse_deterministic(&args.step)
            .unwrap_or_else(|| ParsedAction::unknown(args.step.trim()))
    } else {
        let mut parser = StepParser::new();
        if let Some(completion) = ctx.completion()? {
            parser = parser.with_completion(completion);
        }
        parser.parse(&args.step).await
    };

    emit(output, &action, |action: &ParsedAction| {
        println!("action: {}", action.action_type.as_str());
        if let Some(target) = action.target.as_deref() {
            println!("target: {}", target);
        }
        if let Some(value) = action.value.as_deref() {
            println!("value:  {}", value);
        }
    })
}
