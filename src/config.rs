//! Configuration file model and environment overrides

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use decision_fusion::LearningConfig;
use live_executor::ExecutorConfig;
use serde::{Deserialize, Serialize};
use similarity_index::{HttpEmbeddingConfig, DEFAULT_DIMENSION};
use tracing::warn;

pub const ENV_DATA_DIR: &str = "MENDER_DATA_DIR";
pub const ENV_LEDGER_PATH: &str = "MENDER_LEDGER_PATH";
pub const ENV_INDEX_PATH: &str = "MENDER_INDEX_PATH";
pub const ENV_COMPLETION_API_KEY: &str = "MENDER_COMPLETION_API_KEY";
pub const ENV_COMPLETION_API_BASE: &str = "MENDER_COMPLETION_API_BASE";
pub const ENV_COMPLETION_MODEL: &str = "MENDER_COMPLETION_MODEL";
pub const ENV_EMBEDDING_PROVIDER: &str = "MENDER_EMBEDDING_PROVIDER";

const LEDGER_FILE: &str = "ledger.db";
const INDEX_FILE: &str = "similarity.db";
const REDACTED: &str = "********";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub learning: LearningConfig,
    pub executor: ExecutorConfig,
    pub embedding: EmbeddingConfig,
    pub completion: CompletionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Defaults to `<data_dir>/ledger.db`
    pub ledger_path: Option<PathBuf>,
    /// Defaults to `<data_dir>/similarity.db`
    pub index_path: Option<PathBuf>,
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            ledger_path: None,
            index_path: None,
            retention_days: 30,
        }
    }
}

impl StorageConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(LEDGER_FILE))
    }

    pub fn index_path(&self) -> PathBuf {
        self.index_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(INDEX_FILE))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Hash,
    Http,
}

impl EmbeddingProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hash" => Some(Self::Hash),
            "http" => Some(Self::Http),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub dimension: usize,
    pub api_base: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hash,
            dimension: DEFAULT_DIMENSION,
            api_base: None,
            model: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn http_config(&self) -> HttpEmbeddingConfig {
        let defaults = HttpEmbeddingConfig::default();
        HttpEmbeddingConfig {
            api_base: self.api_base.clone().unwrap_or(defaults.api_base),
            model: self.model.clone().unwrap_or(defaults.model),
            api_key: self.api_key.clone(),
            dimension: self.dimension,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub api_base: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 60,
            temperature: 0.0,
        }
    }
}

impl CompletionConfig {
    /// A key or an explicit endpoint turns the completion client on.
    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some() || self.api_base.is_some()
    }

    pub fn endpoint(&self) -> &str {
        self.api_base.as_deref().unwrap_or(DEFAULT_API_BASE)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Daily-rolling log files are written here when set
    pub directory: Option<PathBuf>,
    pub json: bool,
}

impl Config {
    /// Apply `MENDER_*` environment variables on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_value(ENV_DATA_DIR) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_value(ENV_LEDGER_PATH) {
            self.storage.ledger_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_value(ENV_INDEX_PATH) {
            self.storage.index_path = Some(PathBuf::from(path));
        }
        if let Some(key) = env_value(ENV_COMPLETION_API_KEY) {
            self.completion.api_key = Some(key);
        }
        if let Some(base) = env_value(ENV_COMPLETION_API_BASE) {
            self.completion.api_base = Some(base);
        }
        if let Some(model) = env_value(ENV_COMPLETION_MODEL) {
            self.completion.model = model;
        }
        if let Some(raw) = env_value(ENV_EMBEDDING_PROVIDER) {
            match EmbeddingProviderKind::parse(&raw) {
                Some(kind) => self.embedding.provider = kind,
                None => warn!(value = %raw, "Unknown {}; keeping configured provider", ENV_EMBEDDING_PROVIDER),
            }
        }
    }

    /// Copy with API keys masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        for key in [&mut config.completion.api_key, &mut config.embedding.api_key] {
            if key.is_some() {
                *key = Some(REDACTED.to_string());
            }
        }
        config
    }

    /// Learning settings with the storage retention window applied.
    pub fn learning_config(&self) -> LearningConfig {
        LearningConfig {
            retention_days: self.storage.retention_days,
            ..self.learning.clone()
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mender")
}
