//! External model collaborators: the LLM and the embedding encoder
//!
//! Both are reached through traits so the pipeline can run against fakes in
//! tests and without any provider configured.

pub mod anthropic_client;
pub mod backend;
pub mod encoder;
pub mod llm_client;
pub mod openai_client;

pub use anthropic_client::AnthropicClient;
pub use backend::{LlmProvider, UnknownBackend};
pub use encoder::{encode_with_retry, Embedding, Encoder, OpenAiEncoder, SharedEncoder};
pub use llm_client::{LlmClient, ProviderSettings};
pub use openai_client::OpenAiClient;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Collaborator, PipelineError};

/// Build the LLM client selected by AGENT_BACKEND
pub fn create_llm_client() -> anyhow::Result<Arc<dyn LlmClient>> {
    create_llm_client_for(LlmProvider::from_env()?)
}

pub fn create_llm_client_for(provider: LlmProvider) -> anyhow::Result<Arc<dyn LlmClient>> {
    let client: Arc<dyn LlmClient> = match provider {
        LlmProvider::Anthropic => Arc::new(AnthropicClient::from_env()?),
        LlmProvider::OpenAi => Arc::new(OpenAiClient::from_env()?),
    };
    info!(
        "LLM backend: {} ({})",
        client.provider_name(),
        client.model_name()
    );
    Ok(client)
}

/// One JSON-mode call under a timeout. The LLM is never retried.
pub async fn chat_json_with_timeout(
    llm: &dyn LlmClient,
    system_prompt: &str,
    user_prompt: &str,
    timeout: Duration,
) -> Result<String, PipelineError> {
    match tokio::time::timeout(timeout, llm.chat_json(system_prompt, user_prompt)).await {
        Err(_) => {
            warn!("{} did not answer within {:?}", llm.provider_name(), timeout);
            Err(PipelineError::Timeout {
                collaborator: Collaborator::Llm,
                after: timeout,
            })
        }
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => {
            warn!("{} call failed: {}", llm.provider_name(), e);
            Err(PipelineError::Llm(e.to_string()))
        }
    }
}
