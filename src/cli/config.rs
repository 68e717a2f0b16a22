use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use super::context::CliContext;
use super::output::{emit, OutputFormat};
use crate::config::Config;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration, overrides applied
    Show,

    /// Print the configuration file path in use
    Path,
}

#[derive(Serialize)]
struct ConfigPathView {
    path: String,
    exists: bool,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = ctx.config().redacted();
            match output {
                OutputFormat::Human => {
                    println!("# {}", ctx.config_path().display());
                    print!("{}", serde_yaml::to_string(&config)?);
                    Ok(())
                }
                _ => emit(output, &config, |_: &Config| {}),
            }
        }
        ConfigAction::Path => {
            let path = ctx.config_path();
            let view = ConfigPathView {
                path: path.display().to_string(),
                exists: path.exists(),
            };
            emit(output, &view, |view| println!("{}", view.path))
        }
    }
}
