//! Schema Retrieval Index
//!
//! One vector per table description, searched by cosine similarity. When the
//! encoder is missing or failing the index falls back to TF-IDF keyword
//! overlap over the same descriptions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::store::{EmbeddingStore, PatternMatch};
use super::TableCatalogue;
use crate::agentic::{encode_with_retry, SharedEncoder};

/// Similarity above which a past query pattern is offered to the prompt
pub const PATTERN_THRESHOLD: f32 = 0.8;

/// L2 norm of a vector
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize vector to unit length
pub fn normalize(v: Vec<f32>) -> Vec<f32> {
    let n = l2_norm(&v);
    if n > 0.0 {
        v.into_iter().map(|x| x / n).collect()
    } else {
        v
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (na, nb) = (l2_norm(a), l2_norm(b));
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (na * nb)
}

/// A ranked table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableMatch {
    pub qualified_name: String,
    pub similarity: f32,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingStats {
    pub tables: usize,
    pub tables_with_vectors: usize,
    pub schema_embeddings: usize,
    pub query_patterns: usize,
    pub embedding_dimension: Option<usize>,
    pub native_vectors: bool,
    pub model: Option<String>,
}

pub struct SchemaIndex {
    catalogue: Arc<TableCatalogue>,
    encoder: Option<SharedEncoder>,
    store: Arc<dyn EmbeddingStore>,
    encoder_timeout: Duration,
    keywords: KeywordIndex,
}

impl SchemaIndex {
    /// Encode every table description, reusing stored vectors whose
    /// description has not changed
    #[instrument(skip_all, fields(tables = catalogue.len()))]
    pub async fn build(
        mut catalogue: TableCatalogue,
        encoder: Option<SharedEncoder>,
        store: Arc<dyn EmbeddingStore>,
        encoder_timeout: Duration,
    ) -> Self {
        if let Some(encoder) = &encoder {
            let stored = match store.load_schema_embeddings().await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!("Could not load stored schema embeddings: {}", e);
                    HashMap::new()
                }
            };

            let mut encoded = 0usize;
            let mut reused = 0usize;
            for entry in catalogue.entries_mut() {
                if let Some(existing) = stored.get(&entry.qualified_name) {
                    if existing.description == entry.description
                        && existing.embedding.len() == encoder.dimension()
                    {
                        entry.embedding = Some(existing.embedding.clone());
                        reused += 1;
                        continue;
                    }
                }

                match encode_with_retry(encoder.as_ref(), &entry.description, encoder_timeout).await {
                    Ok(vector) => {
                        if let Err(e) = store
                            .upsert_schema_embedding(&entry.qualified_name, &entry.description, &vector)
                            .await
                        {
                            warn!("Could not persist embedding for {}: {}", entry.qualified_name, e);
                        }
                        entry.embedding = Some(vector);
                        encoded += 1;
                    }
                    Err(e) => {
                        warn!("Could not encode {}: {}", entry.qualified_name, e);
                    }
                }
            }
            info!(encoded, reused, "Schema index built");
        } else {
            info!("No encoder configured, schema index uses keyword ranking only");
        }

        let keywords = KeywordIndex::build(&catalogue);
        Self {
            catalogue: Arc::new(catalogue),
            encoder,
            store,
            encoder_timeout,
            keywords,
        }
    }

    pub fn catalogue(&self) -> &Arc<TableCatalogue> {
        &self.catalogue
    }

    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    /// Top-k tables for an utterance
    #[instrument(skip(self), fields(k))]
    pub async fn find_relevant_tables(&self, utterance: &str, k: usize) -> Vec<TableMatch> {
        let Some(encoder) = &self.encoder else {
            return self.keyword_search(utterance, k);
        };

        let query = match encode_with_retry(encoder.as_ref(), utterance, self.encoder_timeout).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Encoder unavailable, using keyword ranking: {}", e);
                return self.keyword_search(utterance, k);
            }
        };

        let mut matches: Vec<TableMatch> = self
            .catalogue
            .entries()
            .filter_map(|entry| {
                entry.embedding.as_ref().map(|v| TableMatch {
                    qualified_name: entry.qualified_name.clone(),
                    similarity: cosine_similarity(&query, v),
                    description: entry.description.clone(),
                })
            })
            .collect();

        if matches.is_empty() {
            return self.keyword_search(utterance, k);
        }

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(k);
        debug!(top = ?matches.first().map(|m| &m.qualified_name), "vector search");
        matches
    }

    /// TF-IDF keyword ranking, scores scaled into 0..=1
    pub fn keyword_search(&self, utterance: &str, k: usize) -> Vec<TableMatch> {
        self.keywords
            .search(utterance, k)
            .into_iter()
            .filter_map(|(name, score)| {
                self.catalogue.get(&name).map(|entry| TableMatch {
                    qualified_name: entry.qualified_name.clone(),
                    similarity: score,
                    description: entry.description.clone(),
                })
            })
            .collect()
    }

    /// Remember a successful (utterance, SQL) pair. Best-effort.
    pub async fn add_query_pattern(&self, utterance: &str, sql: &str) {
        let Some(encoder) = &self.encoder else {
            return;
        };
        match encode_with_retry(encoder.as_ref(), utterance, self.encoder_timeout).await {
            Ok(vector) => {
                if let Err(e) = self.store.add_query_pattern(utterance, sql, &vector).await {
                    warn!("Could not store query pattern: {}", e);
                }
            }
            Err(e) => warn!("Could not encode query pattern: {}", e),
        }
    }

    /// Closest past pattern above `threshold`
    pub async fn find_similar_query(&self, utterance: &str, threshold: f32) -> Option<PatternMatch> {
        let encoder = self.encoder.as_ref()?;
        let vector = encode_with_retry(encoder.as_ref(), utterance, self.encoder_timeout)
            .await
            .ok()?;
        match self.store.find_similar_pattern(&vector, threshold).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Pattern search failed: {}", e);
                None
            }
        }
    }

    pub async fn stats(&self) -> EmbeddingStats {
        let (schema_embeddings, query_patterns) = self.store.counts().await.unwrap_or((0, 0));
        EmbeddingStats {
            tables: self.catalogue.len(),
            tables_with_vectors: self
                .catalogue
                .entries()
                .filter(|e| e.embedding.is_some())
                .count(),
            schema_embeddings,
            query_patterns,
            embedding_dimension: self.encoder.as_ref().map(|e| e.dimension()),
            native_vectors: self.store.native_vectors(),
            model: self.encoder.as_ref().map(|e| e.model_name().to_string()),
        }
    }
}

/// Inverted keyword index over table descriptions
struct KeywordIndex {
    /// table -> term -> count
    docs: Vec<(String, HashMap<String, f32>, f32)>,
    idf: HashMap<String, f32>,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.strip_suffix('s').filter(|s| s.len() > 2).unwrap_or(t).to_string())
        .collect()
}

impl KeywordIndex {
    fn build(catalogue: &TableCatalogue) -> Self {
        let mut docs = Vec::new();
        let mut df: HashMap<String, f32> = HashMap::new();

        for entry in catalogue.entries() {
            let tokens = tokenize(&format!("{} {}", entry.name, entry.description));
            let len = tokens.len().max(1) as f32;
            let mut tf: HashMap<String, f32> = HashMap::new();
            for t in &tokens {
                *tf.entry(t.clone()).or_default() += 1.0;
            }
            for t in tf.keys() {
                *df.entry(t.clone()).or_default() += 1.0;
            }
            docs.push((entry.qualified_name.clone(), tf, len));
        }

        let n = docs.len() as f32;
        let idf = df
            .into_iter()
            .map(|(t, d)| (t, ((n + 1.0) / (d + 1.0)).ln() + 1.0))
            .collect();
        Self { docs, idf }
    }

    fn search(&self, utterance: &str, k: usize) -> Vec<(String, f32)> {
        let terms: HashSet<String> = tokenize(utterance).into_iter().collect();
        let mut scored: Vec<(String, f32)> = self
            .docs
            .iter()
            .map(|(name, tf, len)| {
                let score: f32 = terms
                    .iter()
                    .filter_map(|t| tf.get(t).map(|c| (c / len) * self.idf.get(t).copied().unwrap_or(1.0)))
                    .sum();
                (name.clone(), score)
            })
            .filter(|(_, s)| *s > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        if let Some(max) = scored.first().map(|(_, s)| *s) {
            for (_, s) in scored.iter_mut() {
                *s /= max;
            }
        }
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentic::Encoder;
    use crate::schema::InMemoryEmbeddingStore;
    use async_trait::async_trait;

    /// Bag-of-words hashed into a fixed number of buckets
    struct HashingEncoder;

    #[async_trait]
    impl Encoder for HashingEncoder {
        async fn encode(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let mut v = vec![0.0f32; 64];
            for token in tokenize(text) {
                let bucket = token.bytes().fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize)) % 64;
                v[bucket] += 1.0;
            }
            Ok(normalize(v))
        }

        fn model_name(&self) -> &str {
            "hashing"
        }

        fn dimension(&self) -> usize {
            64
        }
    }

    async fn index_with_encoder() -> SchemaIndex {
        SchemaIndex::build(
            TableCatalogue::bundled().unwrap(),
            Some(Arc::new(HashingEncoder)),
            Arc::new(InMemoryEmbeddingStore::new()),
            Duration::from_secs(1),
        )
        .await
    }

    #[test]
    fn test_cosine_helpers() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        let n = normalize(vec![3.0, 4.0]);
        assert!((n[0] - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_description_recovers_its_table() {
        let index = index_with_encoder().await;
        for entry in index.catalogue().entries() {
            let top = index.find_relevant_tables(&entry.description, 1).await;
            assert_eq!(top[0].qualified_name, entry.qualified_name);
            assert!((top[0].similarity - 1.0).abs() < 1e-4);
        }
    }

    #[tokio::test]
    async fn test_keyword_fallback_without_encoder() {
        let index = SchemaIndex::build(
            TableCatalogue::bundled().unwrap(),
            None,
            Arc::new(InMemoryEmbeddingStore::new()),
            Duration::from_secs(1),
        )
        .await;
        let top = index.find_relevant_tables("drivers with licence expiry", 3).await;
        assert_eq!(top[0].qualified_name, "public.driver_master");
        assert!((top[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_stored_vectors_are_reused() {
        let store: Arc<dyn EmbeddingStore> = Arc::new(InMemoryEmbeddingStore::new());
        let first = SchemaIndex::build(
            TableCatalogue::bundled().unwrap(),
            Some(Arc::new(HashingEncoder)),
            store.clone(),
            Duration::from_secs(1),
        )
        .await;
        let stats = first.stats().await;
        assert_eq!(stats.schema_embeddings, stats.tables);
        assert_eq!(stats.tables_with_vectors, stats.tables);

        let second = SchemaIndex::build(
            TableCatalogue::bundled().unwrap(),
            Some(Arc::new(HashingEncoder)),
            store,
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(second.stats().await.schema_embeddings, stats.tables);
    }

    #[tokio::test]
    async fn test_query_pattern_memory() {
        let index = index_with_encoder().await;
        index
            .add_query_pattern("total trips per plant", "SELECT hm.name FROM hosp_master hm")
            .await;
        let hit = index
            .find_similar_query("total trips per plant", PATTERN_THRESHOLD)
            .await
            .unwrap();
        assert!(hit.sql.contains("hosp_master"));
        assert!(index
            .find_similar_query("licence expiry of drivers", PATTERN_THRESHOLD)
            .await
            .is_none());
    }
}
