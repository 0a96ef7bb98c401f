//! OpenAI chat completions

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::LlmProvider;
use super::llm_client::{ensure_success, LlmClient, ProviderSettings};

const ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[derive(Clone)]
pub struct OpenAiClient {
    settings: ProviderSettings,
}

impl OpenAiClient {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }

    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ProviderSettings::from_env(LlmProvider::OpenAi)?))
    }

    async fn send(&self, system_prompt: &str, user_prompt: &str, json_object: bool) -> Result<String> {
        let request = CompletionRequest {
            model: &self.settings.model,
            temperature: 0.0,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            response_format: json_object.then_some(ResponseFormat { kind: "json_object" }),
        };
        let response = self
            .settings
            .http
            .post(ENDPOINT)
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .await?;
        let body: CompletionResponse = ensure_success(LlmProvider::OpenAi, response)
            .await?
            .json()
            .await?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("OpenAI returned no choices"))?;
        debug!(model = %self.settings.model, chars = text.len(), "model answered");
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.send(system_prompt, user_prompt, false).await
    }

    async fn chat_json(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.send(system_prompt, user_prompt, true).await
    }

    fn model_name(&self) -> &str {
        &self.settings.model
    }

    fn provider_name(&self) -> &str {
        LlmProvider::OpenAi.label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_mode_only_when_asked() {
        let plain = CompletionRequest {
            model: "gpt-4o-mini",
            temperature: 0.0,
            messages: [
                ChatMessage { role: "system", content: "plan SQL" },
                ChatMessage { role: "user", content: "list zones" },
            ],
            response_format: None,
        };
        assert!(serde_json::to_value(&plain).unwrap().get("response_format").is_none());

        let json = CompletionRequest {
            response_format: Some(ResponseFormat { kind: "json_object" }),
            ..plain
        };
        assert_eq!(
            serde_json::to_value(&json).unwrap()["response_format"]["type"],
            "json_object"
        );
    }

    #[test]
    fn test_names() {
        let client = OpenAiClient::new(ProviderSettings::new("k", "gpt-4o-mini"));
        assert_eq!(client.model_name(), "gpt-4o-mini");
        assert_eq!(client.provider_name(), "OpenAI");
    }
}
