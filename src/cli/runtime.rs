use std::env;
use std::fs as stdfs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{Config, LoggingConfig};

const LOG_FILE_PREFIX: &str = "mender.log";

/// Fill unset variables from `config/local.env`. Returns how many were set.
pub fn load_local_env_overrides() -> usize {
    let path = Path::new("config/local.env");
    if !path.exists() {
        return 0;
    }

    match stdfs::read_to_string(path) {
        Ok(contents) => apply_env_lines(&contents),
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read local.env overrides");
            0
        }
    }
}

fn apply_env_lines(contents: &str) -> usize {
    let mut applied = 0;
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || env::var(key).is_ok() {
            continue;
        }
        env::set_var(key, unescape_value(value.trim()));
        applied += 1;
    }
    applied
}

/// Install the global subscriber. The returned guard flushes the log file on
/// drop and must outlive the command.
pub fn init_logging(
    level: &str,
    debug: bool,
    json: bool,
    logging: &LoggingConfig,
) -> Result<Option<WorkerGuard>> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file, guard) = match logging.directory.as_ref() {
        Some(directory) => {
            stdfs::create_dir_all(directory).with_context(|| {
                format!("Failed to create log directory {}", directory.display())
            })?;
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(guard)
}

pub struct LoadedConfig {
    pub config: Config,
    pub path: PathBuf,
    pub found: bool,
}

/// Resolve and read the configuration file. A missing file yields defaults.
pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;
        Ok(LoadedConfig {
            config,
            path: config_path,
            found: true,
        })
    } else {
        Ok(LoadedConfig {
            config: Config::default(),
            path: config_path,
            found: false,
        })
    }
}

/// `./config/config.yaml` when present, else the per-user config directory.
pub fn default_config_path() -> Result<PathBuf> {
    let local_config = PathBuf::from("config/config.yaml");
    if local_config.exists() {
        return Ok(local_config);
    }
    let mut path = dirs::config_dir().context("Failed to get config directory")?;
    path.push("mender");
    path.push("config.yaml");
    Ok(path)
}

pub fn report_config_source(loaded: &LoadedConfig) {
    if loaded.found {
        info!("Loaded configuration from: {}", loaded.path.display());
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            loaded.path.display()
        );
    }
}

fn unescape_value(value: &str) -> String {
    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let inner = &value[1..value.len() - 1];
        inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t")
    } else {
        value.to_string()
    }
}
