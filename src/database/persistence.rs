//! Postgres persistence for schema embeddings, query patterns and the
//! conversation journal
//!
//! Vectors use the pgvector `vector(D)` type when the extension can be
//! enabled. Otherwise they are stored as JSON text and compared in process.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use pgvector::Vector;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::context::{ConversationJournal, TopicEntities, Turn};
use crate::schema::{cosine_similarity, EmbeddingStore, PatternMatch, StoredEmbedding};

// ============================================================================
// Row Structs
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct VectorEmbeddingRow {
    table_key: String,
    description: Option<String>,
    embedding: Option<Vector>,
}

#[derive(Debug, sqlx::FromRow)]
struct JsonEmbeddingRow {
    table_key: String,
    description: Option<String>,
    embedding_json: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct PatternSemanticRow {
    user_query: String,
    sql_query: String,
    similarity: f64,
}

#[derive(Debug, sqlx::FromRow)]
struct JsonPatternRow {
    user_query: String,
    sql_query: String,
    embedding_json: Option<String>,
}

// ============================================================================
// Embedding store
// ============================================================================

pub struct PgEmbeddingStore {
    pool: PgPool,
    dimension: usize,
    native: bool,
}

impl PgEmbeddingStore {
    /// Connect the store and create its tables
    pub async fn connect(pool: PgPool, dimension: usize) -> anyhow::Result<Self> {
        let native = enable_pgvector(&pool).await;
        let store = Self {
            pool,
            dimension,
            native,
        };
        store.ensure_schema().await?;
        info!(
            dimension,
            pgvector = native,
            "Embedding store ready"
        );
        Ok(store)
    }

    async fn ensure_schema(&self) -> anyhow::Result<()> {
        let column = if self.native {
            format!("embedding vector({})", self.dimension)
        } else {
            "embedding_json TEXT".to_string()
        };

        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS schema_embeddings (
                    id SERIAL PRIMARY KEY,
                    table_key VARCHAR(255) UNIQUE NOT NULL,
                    description TEXT,
                    {column},
                    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS query_patterns (
                    id SERIAL PRIMARY KEY,
                    user_query TEXT NOT NULL,
                    sql_query TEXT NOT NULL,
                    {column},
                    success BOOLEAN DEFAULT TRUE,
                    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                )
                "#
            ),
        ];
        for ddl in &statements {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .context("creating embedding tables")?;
        }

        let indexes: &[&str] = if self.native {
            &[
                "CREATE INDEX IF NOT EXISTS schema_embeddings_vec_idx ON schema_embeddings USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
                "CREATE INDEX IF NOT EXISTS query_patterns_vec_idx ON query_patterns USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
            ]
        } else {
            &[
                "CREATE INDEX IF NOT EXISTS schema_embeddings_key_idx ON schema_embeddings (table_key)",
                "CREATE INDEX IF NOT EXISTS query_patterns_created_idx ON query_patterns (created_at)",
            ]
        };
        for ddl in indexes {
            // ivfflat on an empty table only warns; failures here are not fatal
            if let Err(e) = sqlx::query(ddl).execute(&self.pool).await {
                warn!("Index creation skipped: {}", e);
            }
        }
        Ok(())
    }
}

async fn enable_pgvector(pool: &PgPool) -> bool {
    if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await
    {
        debug!("pgvector unavailable: {}", e);
    }
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'vector')",
    )
    .fetch_one(pool)
    .await
    .unwrap_or(false)
}

fn parse_json_vector(raw: Option<&str>) -> Option<Vec<f32>> {
    raw.and_then(|s| serde_json::from_str::<Vec<f32>>(s).ok())
}

#[async_trait]
impl EmbeddingStore for PgEmbeddingStore {
    async fn upsert_schema_embedding(
        &self,
        table_key: &str,
        description: &str,
        embedding: &[f32],
    ) -> anyhow::Result<()> {
        if self.native {
            sqlx::query(
                r#"
                INSERT INTO schema_embeddings (table_key, description, embedding)
                VALUES ($1, $2, $3)
                ON CONFLICT (table_key) DO UPDATE
                SET description = EXCLUDED.description,
                    embedding = EXCLUDED.embedding,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(table_key)
            .bind(description)
            .bind(Vector::from(embedding.to_vec()))
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                INSERT INTO schema_embeddings (table_key, description, embedding_json)
                VALUES ($1, $2, $3)
                ON CONFLICT (table_key) DO UPDATE
                SET description = EXCLUDED.description,
                    embedding_json = EXCLUDED.embedding_json,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(table_key)
            .bind(description)
            .bind(serde_json::to_string(embedding)?)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn load_schema_embeddings(&self) -> anyhow::Result<HashMap<String, StoredEmbedding>> {
        let mut out = HashMap::new();
        if self.native {
            let rows = sqlx::query_as::<_, VectorEmbeddingRow>(
                "SELECT table_key, description, embedding FROM schema_embeddings",
            )
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                if let Some(vector) = row.embedding {
                    out.insert(
                        row.table_key,
                        StoredEmbedding {
                            description: row.description.unwrap_or_default(),
                            embedding: vector.to_vec(),
                        },
                    );
                }
            }
        } else {
            let rows = sqlx::query_as::<_, JsonEmbeddingRow>(
                "SELECT table_key, description, embedding_json FROM schema_embeddings",
            )
            .fetch_all(&self.pool)
            .await?;
            for row in rows {
                if let Some(embedding) = parse_json_vector(row.embedding_json.as_deref()) {
                    out.insert(
                        row.table_key,
                        StoredEmbedding {
                            description: row.description.unwrap_or_default(),
                            embedding,
                        },
                    );
                }
            }
        }
        debug!(count = out.len(), "loaded stored schema embeddings");
        Ok(out)
    }

    async fn add_query_pattern(
        &self,
        user_query: &str,
        sql: &str,
        embedding: &[f32],
    ) -> anyhow::Result<()> {
        if self.native {
            sqlx::query(
                "INSERT INTO query_patterns (user_query, sql_query, embedding) VALUES ($1, $2, $3)",
            )
            .bind(user_query)
            .bind(sql)
            .bind(Vector::from(embedding.to_vec()))
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO query_patterns (user_query, sql_query, embedding_json) VALUES ($1, $2, $3)",
            )
            .bind(user_query)
            .bind(sql)
            .bind(serde_json::to_string(embedding)?)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn find_similar_pattern(
        &self,
        embedding: &[f32],
        threshold: f32,
    ) -> anyhow::Result<Option<PatternMatch>> {
        if self.native {
            let row = sqlx::query_as::<_, PatternSemanticRow>(
                r#"
                SELECT user_query, sql_query, 1 - (embedding <=> $1::vector) AS similarity
                FROM query_patterns
                WHERE success = TRUE
                  AND embedding IS NOT NULL
                  AND 1 - (embedding <=> $1::vector) > $2
                ORDER BY embedding <=> $1::vector
                LIMIT 1
                "#,
            )
            .bind(Vector::from(embedding.to_vec()))
            .bind(threshold as f64)
            .fetch_optional(&self.pool)
            .await?;
            return Ok(row.map(|r| PatternMatch {
                user_query: r.user_query,
                sql: r.sql_query,
                similarity: r.similarity as f32,
            }));
        }

        let rows = sqlx::query_as::<_, JsonPatternRow>(
            "SELECT user_query, sql_query, embedding_json FROM query_patterns WHERE success = TRUE",
        )
        .fetch_all(&self.pool)
        .await?;
        let best = rows
            .into_iter()
            .filter_map(|r| {
                let stored = parse_json_vector(r.embedding_json.as_deref())?;
                let similarity = cosine_similarity(embedding, &stored);
                (similarity > threshold).then_some(PatternMatch {
                    user_query: r.user_query,
                    sql: r.sql_query,
                    similarity,
                })
            })
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity));
        Ok(best)
    }

    async fn counts(&self) -> anyhow::Result<(usize, usize)> {
        let schema: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_embeddings")
            .fetch_one(&self.pool)
            .await?;
        let patterns: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM query_patterns")
            .fetch_one(&self.pool)
            .await?;
        Ok((schema.max(0) as usize, patterns.max(0) as usize))
    }

    fn native_vectors(&self) -> bool {
        self.native
    }
}

// ============================================================================
// Conversation journal
// ============================================================================

pub struct PgConversationJournal {
    pool: PgPool,
}

impl PgConversationJournal {
    pub async fn connect(pool: PgPool) -> anyhow::Result<Self> {
        let journal = Self { pool };
        journal.ensure_schema().await?;
        Ok(journal)
    }

    async fn ensure_schema(&self) -> anyhow::Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS conversation_context (
                session_id VARCHAR(255) PRIMARY KEY,
                current_topic VARCHAR(255),
                last_vehicle VARCHAR(100),
                last_date_context VARCHAR(100),
                last_report_type VARCHAR(100),
                conversation_summary TEXT,
                active_filters JSONB,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS conversation_history (
                id SERIAL PRIMARY KEY,
                session_id VARCHAR(255) REFERENCES conversation_context(session_id),
                user_message TEXT NOT NULL,
                bot_response TEXT,
                extracted_entities JSONB,
                intent_detected VARCHAR(100),
                sql_executed TEXT,
                result_count INTEGER,
                turn_index INTEGER,
                timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            "CREATE INDEX IF NOT EXISTS conversation_history_session_idx ON conversation_history (session_id, timestamp)",
        ];
        for ddl in statements {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .context("creating conversation tables")?;
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationJournal for PgConversationJournal {
    async fn record_turn(
        &self,
        session_id: &str,
        turn: &Turn,
        result_count: Option<usize>,
    ) -> anyhow::Result<()> {
        // history rows reference the context row
        sqlx::query(
            "INSERT INTO conversation_context (session_id) VALUES ($1) ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_history
                (session_id, user_message, bot_response, extracted_entities, intent_detected,
                 sql_executed, result_count, turn_index, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session_id)
        .bind(&turn.user_text)
        .bind(&turn.assistant_text)
        .bind(serde_json::to_value(&turn.extracted_entities)?)
        .bind(turn.intent_tag.as_deref())
        .bind(turn.sql.as_deref())
        .bind(result_count.map(|n| n as i32))
        .bind(turn.turn_index as i32)
        .bind(turn.timestamp.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_context(
        &self,
        session_id: &str,
        entities: &TopicEntities,
        current_topic: Option<&str>,
    ) -> anyhow::Result<()> {
        use crate::context::EntityKind;

        sqlx::query(
            r#"
            INSERT INTO conversation_context
                (session_id, current_topic, last_vehicle, last_date_context, last_report_type, active_filters)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (session_id) DO UPDATE
            SET current_topic = COALESCE(EXCLUDED.current_topic, conversation_context.current_topic),
                last_vehicle = COALESCE(EXCLUDED.last_vehicle, conversation_context.last_vehicle),
                last_date_context = COALESCE(EXCLUDED.last_date_context, conversation_context.last_date_context),
                last_report_type = COALESCE(EXCLUDED.last_report_type, conversation_context.last_report_type),
                active_filters = EXCLUDED.active_filters,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(session_id)
        .bind(current_topic)
        .bind(entities.get(EntityKind::Vehicle))
        .bind(entities.get(EntityKind::DateContext))
        .bind(entities.get(EntityKind::ReportKind))
        .bind(serde_json::to_value(entities)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
