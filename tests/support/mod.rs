//! In-memory collaborators for driving the pipeline end to end
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use fleet_query::agentic::{Embedding, Encoder, LlmClient};
use fleet_query::database::{ExecutionError, QueryRows, SqlExecutor, SqlParam};
use fleet_query::schema::InMemoryEmbeddingStore;
use fleet_query::{ChatRequest, ChatResponse, PipelineConfig, QueryPipeline, SchemaIndex, TableCatalogue};

/// Returns the rows of the first rule whose needle occurs in the SQL
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Vec<(String, QueryRows)>,
    calls: Mutex<Vec<(String, Vec<SqlParam>)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, needle: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.rules.push((
            needle.to_string(),
            QueryRows::new(columns.iter().map(|c| c.to_string()).collect(), rows),
        ));
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<SqlParam>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_sql(&self) -> Option<String> {
        self.calls.lock().unwrap().last().map(|(sql, _)| sql.clone())
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<QueryRows, ExecutionError> {
        self.calls
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_else(|| QueryRows::new(Vec::new(), Vec::new())))
    }
}

/// Answers the query planner with a fixed reply; follow-up planning fails
/// so the pattern fallback is exercised
pub struct ScriptedLlm {
    pub planner_reply: String,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
        self.chat_json(system_prompt, user_prompt).await
    }

    async fn chat_json(&self, system_prompt: &str, _user_prompt: &str) -> anyhow::Result<String> {
        if system_prompt.contains("operation_type") {
            anyhow::bail!("follow-up planning unavailable");
        }
        Ok(self.planner_reply.clone())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn provider_name(&self) -> &str {
        "test"
    }
}

/// Bag-of-letters vectors: deterministic, and identical text maps to
/// identical vectors
pub struct LetterEncoder;

#[async_trait]
impl Encoder for LetterEncoder {
    async fn encode(&self, text: &str) -> anyhow::Result<Embedding> {
        let mut v = vec![0.0f32; 26];
        for c in text.to_lowercase().chars().filter(char::is_ascii_lowercase) {
            v[(c as u8 - b'a') as usize] += 1.0;
        }
        Ok(v)
    }

    fn model_name(&self) -> &str {
        "letters"
    }

    fn dimension(&self) -> usize {
        26
    }
}

pub async fn pipeline(
    config: PipelineConfig,
    executor: Arc<ScriptedExecutor>,
    llm: Option<Arc<dyn LlmClient>>,
) -> QueryPipeline {
    let index = SchemaIndex::build(
        TableCatalogue::bundled().expect("bundled reference parses"),
        None,
        Arc::new(InMemoryEmbeddingStore::new()),
        Duration::from_secs(1),
    )
    .await;
    QueryPipeline::new(config, Arc::new(index), llm, executor)
}

pub async fn ask(pipeline: &QueryPipeline, session: &str, message: &str) -> ChatResponse {
    pipeline
        .handle(ChatRequest {
            session_id: session.to_string(),
            message: message.to_string(),
            history: None,
        })
        .await
        .unwrap_or_else(|e| panic!("turn '{}' failed: {}", message, e))
}
