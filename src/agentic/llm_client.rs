//! The language-model seam
//!
//! The planner and the follow-up operator only ever ask for a JSON answer to a
//! system + user prompt pair. Provider errors stay as `anyhow` here and are
//! turned into a [`PipelineError`](crate::error::PipelineError) by the caller.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use super::backend::LlmProvider;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Like `chat`, but the provider is told to answer with a JSON object
    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;

    fn provider_name(&self) -> &str;
}

/// Credentials, model and HTTP client shared by the provider clients
#[derive(Clone)]
pub struct ProviderSettings {
    pub api_key: String,
    pub model: String,
    pub http: reqwest::Client,
}

/// Provider error bodies can be large; only this much is kept
const ERROR_BODY_CHARS: usize = 300;

impl ProviderSettings {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env(provider: LlmProvider) -> Result<Self> {
        let api_key = std::env::var(provider.api_key_var())
            .with_context(|| format!("{} is not set", provider.api_key_var()))?;
        let model = std::env::var(provider.model_var())
            .unwrap_or_else(|_| provider.default_model().to_string());
        Ok(Self::new(api_key, model))
    }
}

/// Fail with a short excerpt of the body on a non-2xx status
pub(crate) async fn ensure_success(
    provider: LlmProvider,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let excerpt: String = body.chars().take(ERROR_BODY_CHARS).collect();
    Err(anyhow!("{} returned {}: {}", provider, status, excerpt))
}
