//! SQLite-backed similarity index

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use mender_core_types::{ElementContext, Fingerprint};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::description::describe_element;
use crate::embedding::{cosine_similarity, decode_vector, encode_vector, EmbeddingProvider};
use crate::errors::{IndexError, IndexResult};

/// Embeddings kept in memory per index instance.
pub const EMBEDDING_CACHE_CAPACITY: usize = 1000;

/// Success rate assumed for entries with no recorded outcomes.
pub const UNOBSERVED_SUCCESS_RATE: f64 = 0.5;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS element_embeddings (
        fingerprint TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        text_content TEXT NOT NULL DEFAULT '',
        tag_name TEXT NOT NULL DEFAULT '',
        attributes TEXT NOT NULL DEFAULT '{}',
        context TEXT NOT NULL DEFAULT '',
        page_url TEXT NOT NULL DEFAULT '',
        selector TEXT NOT NULL,
        embedding BLOB NOT NULL,
        dimension INTEGER NOT NULL,
        success_count INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0,
        last_used TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_embeddings_tag ON element_embeddings(tag_name);
    CREATE INDEX IF NOT EXISTS idx_embeddings_page ON element_embeddings(page_url);
";

const UPSERT_ENTRY: &str = "
    INSERT INTO element_embeddings
        (fingerprint, description, text_content, tag_name, attributes, context,
         page_url, selector, embedding, dimension, last_used, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
    ON CONFLICT(fingerprint) DO UPDATE SET
        description = excluded.description,
        context = excluded.context,
        page_url = excluded.page_url,
        selector = excluded.selector,
        embedding = excluded.embedding,
        dimension = excluded.dimension,
        last_used = excluded.last_used";

const INSERT_ENTRY_IF_ABSENT: &str = "
    INSERT INTO element_embeddings
        (fingerprint, description, text_content, tag_name, attributes, context,
         page_url, selector, embedding, dimension, last_used, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
    ON CONFLICT(fingerprint) DO NOTHING";

const MATCH_COLUMNS: &str =
    "fingerprint, selector, text_content, tag_name, page_url, success_count, failure_count";

/// Coefficients of the ranking blend between similarity and success rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankWeights {
    pub similarity: f64,
    pub success_rate: f64,
}

impl RankWeights {
    pub fn score(&self, similarity: f64, success_rate: f64) -> f64 {
        similarity * self.similarity + success_rate * self.success_rate
    }
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            similarity: 0.7,
            success_rate: 0.3,
        }
    }
}

/// A stored element that resembles the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarElement {
    pub fingerprint: Fingerprint,
    pub similarity: f64,
    pub selector: String,
    pub text: String,
    pub tag: String,
    pub page_url: String,
    pub success_rate: f64,
    pub rank_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub entries: u64,
    pub distinct_tags: u64,
    pub distinct_pages: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub overall_success_rate: f64,
    pub dimension: usize,
    pub provider: String,
    pub cache_size: usize,
}

/// Bounded FIFO of description → embedding.
#[derive(Debug, Default)]
struct EmbeddingCache {
    vectors: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl EmbeddingCache {
    fn new(capacity: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &str) -> Option<Vec<f32>> {
        self.vectors.get(key).cloned()
    }

    fn insert(&mut self, key: String, vector: Vec<f32>) {
        if self.vectors.contains_key(&key) {
            return;
        }
        while self.vectors.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.vectors.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.vectors.insert(key, vector);
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}

/// Durable fingerprint → (embedding, selector, outcome counters) store.
pub struct SimilarityIndex {
    conn: Mutex<Connection>,
    provider: Arc<dyn EmbeddingProvider>,
    cache: Mutex<EmbeddingCache>,
    weights: RankWeights,
}

impl SimilarityIndex {
    pub fn open(path: impl AsRef<Path>, provider: Arc<dyn EmbeddingProvider>) -> IndexResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Self::from_connection(conn, provider)
    }

    pub fn in_memory(provider: Arc<dyn EmbeddingProvider>) -> IndexResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, provider)
    }

    fn from_connection(conn: Connection, provider: Arc<dyn EmbeddingProvider>) -> IndexResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            provider,
            cache: Mutex::new(EmbeddingCache::new(EMBEDDING_CACHE_CAPACITY)),
            weights: RankWeights::default(),
        })
    }

    pub fn with_rank_weights(mut self, weights: RankWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn rank_weights(&self) -> RankWeights {
        self.weights
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    async fn embed_description(&self, description: &str) -> IndexResult<Vec<f32>> {
        if let Some(vector) = self.cache.lock().get(description) {
            return Ok(vector);
        }
        let vector = self.provider.embed(description).await?;
        if vector.len() != self.provider.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.provider.dimension(),
                actual: vector.len(),
            });
        }
        self.cache
            .lock()
            .insert(description.to_string(), vector.clone());
        Ok(vector)
    }

    /// Upsert the entry for an element, pointing it at `selector`.
    ///
    /// Counters of an existing entry are preserved.
    pub async fn index_element(
        &self,
        context: &ElementContext,
        selector: &str,
    ) -> IndexResult<Fingerprint> {
        self.write_entry(context, selector, UPSERT_ENTRY).await
    }

    /// Create the entry for an element unless one exists; an existing entry
    /// keeps its selector.
    pub async fn index_if_absent(
        &self,
        context: &ElementContext,
        selector: &str,
    ) -> IndexResult<Fingerprint> {
        self.write_entry(context, selector, INSERT_ENTRY_IF_ABSENT).await
    }

    async fn write_entry(
        &self,
        context: &ElementContext,
        selector: &str,
        sql: &str,
    ) -> IndexResult<Fingerprint> {
        let element = &context.element;
        if element.is_empty() {
            return Err(IndexError::EmptyElement);
        }
        let fingerprint = Fingerprint::of(element);
        let description = describe_element(context);
        let vector = self.embed_description(&description).await?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let changed = self.conn.lock().execute(
            sql,
            params![
                fingerprint.as_str(),
                description,
                element.trimmed_text(),
                element.tag_name.to_ascii_lowercase(),
                serde_json::to_string(&element.attributes)?,
                context.surrounding_text,
                context.page_url,
                selector,
                encode_vector(&vector),
                vector.len() as i64,
                now,
            ],
        )?;
        if changed > 0 {
            debug!(fingerprint = %fingerprint, selector, "Element indexed");
        }
        Ok(fingerprint)
    }

    /// Stored elements whose description embeds close to the query's.
    ///
    /// Results under `min_similarity` are dropped; the rest are ranked by the
    /// similarity/success-rate blend and truncated to `top_k`.
    pub async fn find_similar(
        &self,
        context: &ElementContext,
        top_k: usize,
        min_similarity: f64,
        same_tag_only: bool,
    ) -> IndexResult<Vec<SimilarElement>> {
        let description = describe_element(context);
        let query = self.embed_description(&description).await?;
        let tag = context.element.tag_name.to_ascii_lowercase();

        let rows = {
            let conn = self.conn.lock();
            let mut stmt = if same_tag_only {
                conn.prepare(&format!(
                    "SELECT {MATCH_COLUMNS}, embedding FROM element_embeddings WHERE tag_name = ?1"
                ))?
            } else {
                conn.prepare(&format!(
                    "SELECT {MATCH_COLUMNS}, embedding FROM element_embeddings"
                ))?
            };
            let rows = if same_tag_only {
                stmt.query_map(params![tag], match_with_embedding)?
                    .collect::<Result<Vec<_>, _>>()?
            } else {
                stmt.query_map([], match_with_embedding)?
                    .collect::<Result<Vec<_>, _>>()?
            };
            rows
        };

        let mut skipped = 0usize;
        let mut results: Vec<SimilarElement> = rows
            .into_iter()
            .filter_map(|(mut entry, blob)| {
                let stored = decode_vector(&blob);
                if stored.len() != query.len() {
                    skipped += 1;
                    return None;
                }
                let similarity = cosine_similarity(&query, &stored);
                if similarity < min_similarity {
                    return None;
                }
                entry.similarity = similarity;
                entry.rank_score = self.weights.score(similarity, entry.success_rate);
                Some(entry)
            })
            .collect();
        if skipped > 0 {
            warn!(skipped, dimension = query.len(), "Skipped entries with mismatched dimension");
        }

        results.sort_by(|a, b| b.rank_score.total_cmp(&a.rank_score));
        results.truncate(top_k);
        Ok(results)
    }

    /// Fast path without embedding: exact text matches, then partial ones.
    pub fn find_by_text(
        &self,
        text: &str,
        tag: Option<&str>,
        limit: usize,
    ) -> IndexResult<Vec<SimilarElement>> {
        let text = text.trim();
        if text.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let tag = tag.map(str::to_ascii_lowercase);
        let like = format!("%{}%", escape_like(text));

        let conn = self.conn.lock();
        let mut exact_stmt = conn.prepare(&format!(
            "SELECT {MATCH_COLUMNS} FROM element_embeddings
             WHERE text_content = ?1 AND (?2 IS NULL OR tag_name = ?2)
             ORDER BY success_count DESC, last_used DESC LIMIT ?3"
        ))?;
        let mut results = exact_stmt
            .query_map(params![text, tag, limit as i64], match_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        if results.len() < limit {
            let seen: HashSet<Fingerprint> =
                results.iter().map(|r| r.fingerprint.clone()).collect();
            let mut partial_stmt = conn.prepare(&format!(
                "SELECT {MATCH_COLUMNS} FROM element_embeddings
                 WHERE text_content LIKE ?1 ESCAPE '\\' AND (?2 IS NULL OR tag_name = ?2)
                 ORDER BY success_count DESC, last_used DESC LIMIT ?3"
            ))?;
            let partial = partial_stmt
                .query_map(params![like, tag, limit as i64], match_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            results.extend(
                partial
                    .into_iter()
                    .filter(|r| !seen.contains(&r.fingerprint)),
            );
            results.truncate(limit);
        }

        for entry in &mut results {
            entry.similarity = 1.0;
            entry.rank_score = self.weights.score(1.0, entry.success_rate);
        }
        Ok(results)
    }

    /// Bump the outcome counters of an entry. Returns false when unknown.
    pub fn record_outcome(&self, fingerprint: &Fingerprint, success: bool) -> IndexResult<bool> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let sql = if success {
            "UPDATE element_embeddings SET success_count = success_count + 1, last_used = ?1
             WHERE fingerprint = ?2"
        } else {
            "UPDATE element_embeddings SET failure_count = failure_count + 1, last_used = ?1
             WHERE fingerprint = ?2"
        };
        let changed = self
            .conn
            .lock()
            .execute(sql, params![now, fingerprint.as_str()])?;
        Ok(changed > 0)
    }

    pub fn stats(&self) -> IndexResult<IndexStats> {
        let conn = self.conn.lock();
        let (entries, distinct_tags, distinct_pages, total_successes, total_failures) = conn
            .query_row(
                "SELECT COUNT(*), COUNT(DISTINCT tag_name), COUNT(DISTINCT page_url),
                        COALESCE(SUM(success_count), 0), COALESCE(SUM(failure_count), 0)
                 FROM element_embeddings",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )?;
        let observed = total_successes + total_failures;
        Ok(IndexStats {
            entries: entries.max(0) as u64,
            distinct_tags: distinct_tags.max(0) as u64,
            distinct_pages: distinct_pages.max(0) as u64,
            total_successes: total_successes.max(0) as u64,
            total_failures: total_failures.max(0) as u64,
            overall_success_rate: if observed > 0 {
                total_successes as f64 / observed as f64
            } else {
                0.0
            },
            dimension: self.provider.dimension(),
            provider: self.provider.name().to_string(),
            cache_size: self.cache.lock().len(),
        })
    }
}

fn success_rate(successes: i64, failures: i64) -> f64 {
    let total = successes + failures;
    if total > 0 {
        successes as f64 / total as f64
    } else {
        UNOBSERVED_SUCCESS_RATE
    }
}

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<SimilarElement> {
    let successes: i64 = row.get(5)?;
    let failures: i64 = row.get(6)?;
    Ok(SimilarElement {
        fingerprint: Fingerprint::from(row.get::<_, String>(0)?),
        similarity: 0.0,
        selector: row.get(1)?,
        text: row.get(2)?,
        tag: row.get(3)?,
        page_url: row.get(4)?,
        success_rate: success_rate(successes, failures),
        rank_score: 0.0,
    })
}

fn match_with_embedding(row: &Row<'_>) -> rusqlite::Result<(SimilarElement, Vec<u8>)> {
    Ok((match_from_row(row)?, row.get(7)?))
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingProvider;
    use mender_core_types::ElementDescriptor;

    fn index() -> SimilarityIndex {
        SimilarityIndex::in_memory(Arc::new(HashEmbeddingProvider::default())).unwrap()
    }

    fn login_context() -> ElementContext {
        ElementContext::new(
            ElementDescriptor::new("button")
                .with_text("Login")
                .with_attr("data-testid", "login-btn"),
            "https://example.com/login",
            "Sign in",
        )
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let mut cache = EmbeddingCache::new(2);
        cache.insert("a".into(), vec![1.0]);
        cache.insert("b".into(), vec![2.0]);
        cache.insert("c".into(), vec![3.0]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("c"), Some(vec![3.0]));
    }

    #[test]
    fn test_success_rate_defaults_to_half() {
        assert_eq!(success_rate(0, 0), UNOBSERVED_SUCCESS_RATE);
        assert_eq!(success_rate(3, 1), 0.75);
    }

    #[tokio::test]
    async fn test_identical_element_is_found() {
        let index = index();
        let fingerprint = index
            .index_element(&login_context(), "[data-testid=\"login-btn\"]")
            .await
            .unwrap();

        let matches = index.find_similar(&login_context(), 5, 0.7, true).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].fingerprint, fingerprint);
        assert!((matches[0].similarity - 1.0).abs() < 1e-6);
        assert!((matches[0].rank_score - (0.7 + 0.3 * 0.5)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_index_if_absent_keeps_existing_selector() {
        let index = index();
        let fingerprint = index
            .index_if_absent(&login_context(), "text=\"Login\"")
            .await
            .unwrap();
        assert_eq!(index.stats().unwrap().entries, 1);

        index
            .index_element(&login_context(), "[data-testid=\"login-btn\"]")
            .await
            .unwrap();
        index
            .index_if_absent(&login_context(), "button:has-text(\"Login\")")
            .await
            .unwrap();

        let hits = index.find_by_text("Login", None, 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].fingerprint, fingerprint);
        assert_eq!(hits[0].selector, "[data-testid=\"login-btn\"]");
    }

    #[tokio::test]
    async fn test_same_tag_filter() {
        let index = index();
        index
            .index_element(&login_context(), "[data-testid=\"login-btn\"]")
            .await
            .unwrap();

        let mut link = login_context();
        link.element.tag_name = "a".into();
        assert!(index.find_similar(&link, 5, -1.0, true).await.unwrap().is_empty());
        assert_eq!(index.find_similar(&link, 5, -1.0, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outcomes_shift_ranking() {
        let index = index();
        let fingerprint = index
            .index_element(&login_context(), "[data-testid=\"login-btn\"]")
            .await
            .unwrap();
        assert!(index.record_outcome(&fingerprint, true).unwrap());
        assert!(index.record_outcome(&fingerprint, false).unwrap());
        assert!(index.record_outcome(&fingerprint, true).unwrap());
        assert!(!index
            .record_outcome(&Fingerprint::from("missing"), true)
            .unwrap());

        let hits = index.find_by_text("Login", Some("BUTTON"), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(hits[0].similarity, 1.0);
    }

    #[tokio::test]
    async fn test_reindex_keeps_counters() {
        let index = index();
        let fingerprint = index.index_element(&login_context(), "#old").await.unwrap();
        index.record_outcome(&fingerprint, true).unwrap();
        index.index_element(&login_context(), "#new").await.unwrap();

        let hits = index.find_by_text("Login", None, 5).unwrap();
        assert_eq!(hits[0].selector, "#new");
        assert_eq!(hits[0].success_rate, 1.0);
        assert_eq!(index.stats().unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_empty_element_is_rejected() {
        let index = index();
        let err = index
            .index_element(&ElementContext::default(), "#x")
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::EmptyElement));
    }
}
