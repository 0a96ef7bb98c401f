//! Persistence seam for schema embeddings and query patterns

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use super::index::cosine_similarity;
use crate::agentic::Embedding;

/// A past (utterance, SQL) pair close to the current utterance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternMatch {
    pub user_query: String,
    pub sql: String,
    pub similarity: f32,
}

/// Stored description and vector of one table
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub description: String,
    pub embedding: Embedding,
}

#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    async fn upsert_schema_embedding(
        &self,
        table_key: &str,
        description: &str,
        embedding: &[f32],
    ) -> anyhow::Result<()>;

    async fn load_schema_embeddings(&self) -> anyhow::Result<HashMap<String, StoredEmbedding>>;

    async fn add_query_pattern(
        &self,
        user_query: &str,
        sql: &str,
        embedding: &[f32],
    ) -> anyhow::Result<()>;

    /// Most similar stored pattern strictly above `threshold`
    async fn find_similar_pattern(
        &self,
        embedding: &[f32],
        threshold: f32,
    ) -> anyhow::Result<Option<PatternMatch>>;

    /// (schema embeddings, query patterns)
    async fn counts(&self) -> anyhow::Result<(usize, usize)>;

    /// Whether similarity runs on a native vector type
    fn native_vectors(&self) -> bool;
}

/// Process-local store, used when no database is configured
#[derive(Default)]
pub struct InMemoryEmbeddingStore {
    schema: RwLock<HashMap<String, StoredEmbedding>>,
    patterns: RwLock<Vec<(String, String, Embedding)>>,
}

impl InMemoryEmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmbeddingStore for InMemoryEmbeddingStore {
    async fn upsert_schema_embedding(
        &self,
        table_key: &str,
        description: &str,
        embedding: &[f32],
    ) -> anyhow::Result<()> {
        self.schema.write().await.insert(
            table_key.to_string(),
            StoredEmbedding {
                description: description.to_string(),
                embedding: embedding.to_vec(),
            },
        );
        Ok(())
    }

    async fn load_schema_embeddings(&self) -> anyhow::Result<HashMap<String, StoredEmbedding>> {
        Ok(self.schema.read().await.clone())
    }

    async fn add_query_pattern(
        &self,
        user_query: &str,
        sql: &str,
        embedding: &[f32],
    ) -> anyhow::Result<()> {
        self.patterns
            .write()
            .await
            .push((user_query.to_string(), sql.to_string(), embedding.to_vec()));
        Ok(())
    }

    async fn find_similar_pattern(
        &self,
        embedding: &[f32],
        threshold: f32,
    ) -> anyhow::Result<Option<PatternMatch>> {
        let patterns = self.patterns.read().await;
        let best = patterns
            .iter()
            .map(|(q, sql, v)| (q, sql, cosine_similarity(embedding, v)))
            .filter(|(_, _, sim)| *sim > threshold)
            .max_by(|a, b| a.2.total_cmp(&b.2));
        Ok(best.map(|(q, sql, similarity)| PatternMatch {
            user_query: q.clone(),
            sql: sql.clone(),
            similarity,
        }))
    }

    async fn counts(&self) -> anyhow::Result<(usize, usize)> {
        Ok((
            self.schema.read().await.len(),
            self.patterns.read().await.len(),
        ))
    }

    fn native_vectors(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_similar_pattern_respects_threshold() {
        let store = InMemoryEmbeddingStore::new();
        store
            .add_query_pattern("trips per plant", "SELECT 1", &[1.0, 0.0])
            .await
            .unwrap();
        store
            .add_query_pattern("drivers by age", "SELECT 2", &[0.0, 1.0])
            .await
            .unwrap();

        let hit = store
            .find_similar_pattern(&[0.9, 0.1], 0.8)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.sql, "SELECT 1");

        let miss = store.find_similar_pattern(&[0.7, 0.7], 0.8).await.unwrap();
        assert!(miss.is_none());
        assert_eq!(store.counts().await.unwrap(), (0, 2));
    }
}
