//! Anthropic Messages API

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::LlmProvider;
use super::llm_client::{ensure_success, LlmClient, ProviderSettings};

const ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Planner answers are one SQL statement and a sentence or two
const MAX_TOKENS: u32 = 2048;

/// The Messages API has no JSON mode, so the instruction goes in the system prompt
const JSON_ONLY: &str = "Answer with a single JSON object and nothing else: no prose, no code fences.";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: [UserMessage<'a>; 1],
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Clone)]
pub struct AnthropicClient {
    settings: ProviderSettings,
}

impl AnthropicClient {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ProviderSettings::from_env(LlmProvider::Anthropic)?))
    }

    async fn send(&self, system: &str, user_prompt: &str) -> Result<String> {
        let request = MessagesRequest {
            model: &self.settings.model,
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
            system,
            messages: [UserMessage {
                role: "user",
                content: user_prompt,
            }],
        };
        let response = self
            .settings
            .http
            .post(ENDPOINT)
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;
        let body: MessagesResponse = ensure_success(LlmProvider::Anthropic, response)
            .await?
            .json()
            .await?;

        let text: String = body.content.into_iter().filter_map(|b| b.text).collect();
        if text.trim().is_empty() {
            return Err(anyhow!("Anthropic returned no text"));
        }
        debug!(model = %self.settings.model, chars = text.len(), "model answered");
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.send(system_prompt, user_prompt).await
    }

    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let system = format!("{}\n\n{}", system_prompt, JSON_ONLY);
        self.send(&system, user_prompt).await
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }

    fn provider_name(&self) -> &str {
        LlmProvider::Anthropic.label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = MessagesRequest {
            model: "claude-3-haiku",
            max_tokens: MAX_TOKENS,
            temperature: 0.0,
            system: "plan SQL",
            messages: [UserMessage {
                role: "user",
                content: "list zones",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["system"], "plan SQL");
        assert_eq!(json["messages"][0]["content"], "list zones");
    }

    #[test]
    fn test_names() {
        let client = AnthropicClient::new(ProviderSettings::new("k", "claude-3-haiku"));
        assert_eq!(client.model_name(), "claude-3-haiku");
        assert_eq!(client.provider_name(), "Anthropic");
    }
}
