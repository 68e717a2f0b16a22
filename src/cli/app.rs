use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::output::LogFormat;
use super::runtime::{
    init_logging, load_config, load_local_env_overrides, report_config_source, LoadedConfig,
};

pub async fn run() -> Result<()> {
    let env_overrides = load_local_env_overrides();
    let cli = CliArgs::parse();

    let mut loaded = load_config(cli.config.as_ref()).await?;
    loaded.config.apply_env_overrides();
    if let Some(dir) = cli.data_dir.as_ref() {
        loaded.config.storage.data_dir = dir.clone();
    }

    let json_logs = match cli.log_format {
        Some(format) => format == LogFormat::Json,
        None => loaded.config.logging.json,
    };
    let _log_guard = init_logging(&cli.log_level, cli.debug, json_logs, &loaded.config.logging)?;

    info!("Starting Mender v{}", env!("CARGO_PKG_VERSION"));
    if env_overrides > 0 {
        info!(count = env_overrides, "Loaded environment overrides from local.env");
    }
    report_config_source(&loaded);

    let LoadedConfig { config, path, .. } = loaded;
    let cli_context = CliContext::new(config, path);

    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
