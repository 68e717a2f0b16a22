use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use decision_fusion::SelectorEngine;
use interaction_ledger::InteractionLedger;
use live_executor::CompletionService;
use similarity_index::{
    EmbeddingProvider, HashEmbeddingProvider, HttpEmbeddingProvider, SimilarityIndex,
};
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::completion::HttpCompletionClient;
use crate::config::{Config, EmbeddingProviderKind};

pub struct CliContext {
    config: Arc<Config>,
    config_path: PathBuf,
    engine: OnceCell<Arc<SelectorEngine>>,
}

impl CliContext {
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            engine: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Engine over the configured stores, opened on first use.
    pub async fn engine(&self) -> Result<Arc<SelectorEngine>> {
        self.engine
            .get_or_try_init(|| self.open_engine())
            .await
            .map(Arc::clone)
    }

    /// Completion client when an endpoint or key is configured.
    pub fn completion(&self) -> Result<Option<Arc<dyn CompletionService>>> {
        if !self.config.completion.is_enabled() {
            return Ok(None);
        }
        let client = HttpCompletionClient::new(&self.config.completion)?;
        Ok(Some(Arc::new(client)))
    }

    async fn open_engine(&self) -> Result<Arc<SelectorEngine>> {
        let storage = &self.config.storage;
        let ledger_path = storage.ledger_path();
        let index_path = storage.index_path();
        for path in [&ledger_path, &index_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let ledger = InteractionLedger::open(&ledger_path)
            .with_context(|| format!("Failed to open ledger {}", ledger_path.display()))?;

        let embedding = &self.config.embedding;
        let provider: Arc<dyn EmbeddingProvider> = match embedding.provider {
            EmbeddingProviderKind::Hash => {
                Arc::new(HashEmbeddingProvider::new(embedding.dimension))
            }
            EmbeddingProviderKind::Http => Arc::new(
                HttpEmbeddingProvider::new(embedding.http_config())
                    .context("Failed to build embedding client")?,
            ),
        };

        let learning = self.config.learning_config();
        let index = SimilarityIndex::open(&index_path, provider)
            .with_context(|| format!("Failed to open similarity index {}", index_path.display()))?
            .with_rank_weights(learning.blend.similarity_rank);

        debug!(
            ledger = %ledger_path.display(),
            index = %index_path.display(),
            "Opened learning stores"
        );
        Ok(Arc::new(SelectorEngine::new(
            Arc::new(ledger),
            Arc::new(index),
            learning,
        )))
    }
}
