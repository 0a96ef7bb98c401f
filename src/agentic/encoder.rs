//! Embedding encoder
//!
//! Text to a fixed-dimension vector. The dimension is chosen at startup and
//! every stored vector must share it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::backend::LlmProvider;
use super::llm_client::{ensure_success, ProviderSettings};
use crate::error::{Collaborator, PipelineError};

pub type Embedding = Vec<f32>;

#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Embedding>;

    /// Batch encode; the default encodes one at a time
    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.encode(text).await?);
        }
        Ok(out)
    }

    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;
}

pub type SharedEncoder = Arc<dyn Encoder>;

/// OpenAI embeddings endpoint, truncated to the configured dimension
pub struct OpenAiEncoder {
    settings: ProviderSettings,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a, I: Serialize> {
    model: &'a str,
    input: I,
    dimensions: usize,
}

impl OpenAiEncoder {
    pub fn new(settings: ProviderSettings, dimension: usize) -> Self {
        Self {
            settings,
            dimension,
        }
    }

    /// Key from OPENAI_API_KEY; model and dimension from the pipeline config
    pub fn from_env(model: &str, dimension: usize) -> Result<Self> {
        let var = LlmProvider::OpenAi.api_key_var();
        let api_key = std::env::var(var).with_context(|| format!("{} is not set", var))?;
        Ok(Self::new(ProviderSettings::new(api_key, model), dimension))
    }

    async fn request<I: Serialize + Send>(&self, input: I) -> Result<Vec<EmbeddingData>> {
        let request = EmbeddingRequest {
            model: &self.settings.model,
            input,
            dimensions: self.dimension,
        };
        let response = self
            .settings
            .http
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await?;
        let body: EmbeddingResponse = ensure_success(LlmProvider::OpenAi, response)
            .await?
            .json()
            .await?;

        let mut data = body.data;
        data.sort_by_key(|d| d.index);
        Ok(data)
    }
}

#[async_trait]
impl Encoder for OpenAiEncoder {
    async fn encode(&self, text: &str) -> Result<Embedding> {
        self.request(text)
            .await?
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("No embedding in response"))
    }

    async fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let data = self.request(texts).await?;
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Encode under a timeout, retrying once on failure
pub async fn encode_with_retry(
    encoder: &dyn Encoder,
    text: &str,
    timeout: Duration,
) -> std::result::Result<Embedding, PipelineError> {
    let mut last_error = String::new();
    for attempt in 1..=2 {
        match tokio::time::timeout(timeout, encoder.encode(text)).await {
            Err(_) => {
                return Err(PipelineError::Timeout {
                    collaborator: Collaborator::Encoder,
                    after: timeout,
                })
            }
            Ok(Ok(vector)) => return Ok(vector),
            Ok(Err(e)) => {
                warn!(attempt, "Encoder failure: {}", e);
                last_error = e.to_string();
            }
        }
    }
    Err(PipelineError::Encoder(last_error))
}
