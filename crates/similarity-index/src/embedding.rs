//! Embedding providers

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::errors::{IndexError, IndexResult};

/// Dimension used by the hash provider unless configured otherwise.
pub const DEFAULT_DIMENSION: usize = 384;

/// Turns element descriptions into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> IndexResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Deterministic offline provider.
///
/// The SHA-256 digest of the text is repeated to fill the dimension, each byte
/// mapped to [-1, 1], and the result L2-normalised. Identical texts embed
/// identically; unrelated texts are close to orthogonal.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut vector: Vec<f32> = digest
            .iter()
            .cycle()
            .take(self.dimension)
            .map(|byte| f32::from(*byte) / 127.5 - 1.0)
            .collect();
        normalize(&mut vector);
        vector
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> IndexResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_sync(text)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    pub api_base: String,
    pub model: String,
    pub api_key: Option<String>,
    pub dimension: usize,
    pub timeout: Duration,
}

impl Default for HttpEmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            dimension: 1536,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Provider backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbeddingProvider {
    client: Client,
    config: HttpEmbeddingConfig,
}

impl HttpEmbeddingProvider {
    pub fn new(config: HttpEmbeddingConfig) -> IndexResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    async fn request(&self, input: &[String]) -> IndexResult<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.config.api_base.trim_end_matches('/'));
        let body = EmbeddingRequest {
            model: &self.config.model,
            input,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = self.config.api_key.as_deref() {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(IndexError::Embedding(format!(
                "embedding endpoint returned {status}: {text}"
            )));
        }

        let mut payload: EmbeddingResponse = response.json().await?;
        payload.data.sort_by_key(|item| item.index);
        if payload.data.len() != input.len() {
            return Err(IndexError::Embedding(format!(
                "expected {} embeddings, got {}",
                input.len(),
                payload.data.len()
            )));
        }

        let mut vectors = Vec::with_capacity(payload.data.len());
        for item in payload.data {
            if item.embedding.len() != self.config.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }
        debug!(model = %self.config.model, count = vectors.len(), "Embeddings received");
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> IndexResult<Vec<f32>> {
        self.request(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| IndexError::Embedding("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> IndexResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

/// Cosine similarity; zero for empty, zero-norm or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Little-endian f32 encoding used for the embedding BLOB column.
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_provider_is_deterministic_and_normalised() {
        let provider = HashEmbeddingProvider::default();
        let a = provider.embed("button; with text 'Login'").await.unwrap();
        let b = provider.embed("button; with text 'Login'").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_DIMENSION);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hash_provider_batch_matches_single() {
        let provider = HashEmbeddingProvider::new(16);
        let texts = vec!["one".to_string(), "two".to_string()];
        let batch = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(batch[1], provider.embed("two").await.unwrap());
        assert!(cosine_similarity(&batch[0], &batch[1]) < 0.99);
    }

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 2.0])).abs() < 1e-12);
    }

    #[test]
    fn test_vector_blob_encoding() {
        let vector = vec![0.25f32, -1.5, 3.0];
        let bytes = encode_vector(&vector);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_vector(&bytes), vector);
    }
}
