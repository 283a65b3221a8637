//! LLM integration for MailAssist.
//!
//! Supports:
//! - **OpenAI**: Direct API access via rig-core (default)
//! - **Anthropic**: Direct API access via rig-core
//!
//! A rig agent carries the JSON-reply preamble, temperature and token limit;
//! [`LlmReplyGenerator`] wraps it with prompt construction, timeout and
//! response validation.

pub mod reply;

pub use reply::{CompletionBackend, LlmReplyGenerator};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rig::agent::{Agent, AgentBuilder};
use rig::client::CompletionClient;
use rig::completion::{CompletionModel, Prompt};
use secrecy::ExposeSecret;

use crate::config::{LlmBackend, LlmSettings};
use crate::error::LlmError;
use crate::pipeline::types::ReplyGenerator;

/// rig agent exposed as a [`CompletionBackend`].
pub struct RigBackend<M: CompletionModel> {
    agent: Agent<M>,
    provider: &'static str,
}

impl<M: CompletionModel> RigBackend<M> {
    pub fn new(model: M, provider: &'static str, settings: &LlmSettings) -> Self {
        let agent = AgentBuilder::new(model)
            .preamble(reply::SYSTEM_PROMPT)
            .temperature(settings.temperature)
            .max_tokens(settings.max_tokens)
            .build();
        Self { agent, provider }
    }
}

#[async_trait]
impl<M> CompletionBackend for RigBackend<M>
where
    M: CompletionModel + 'static,
{
    fn provider(&self) -> &str {
        self.provider
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.agent
            .prompt(prompt)
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Create the reply generator for the configured backend.
pub fn create_reply_generator(
    settings: &LlmSettings,
) -> Result<Arc<dyn ReplyGenerator>, LlmError> {
    let backend = create_backend(settings)?;
    let timeout = Duration::from_secs(settings.request_timeout);
    Ok(Arc::new(LlmReplyGenerator::new(backend, timeout)))
}

fn create_backend(settings: &LlmSettings) -> Result<Arc<dyn CompletionBackend>, LlmError> {
    match settings.backend {
        LlmBackend::OpenAi => create_openai_backend(settings),
        LlmBackend::Anthropic => create_anthropic_backend(settings),
    }
}

fn create_openai_backend(settings: &LlmSettings) -> Result<Arc<dyn CompletionBackend>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(settings.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&settings.model);
    tracing::info!("Using OpenAI (model: {})", settings.model);
    Ok(Arc::new(RigBackend::new(model, "openai", settings)))
}

fn create_anthropic_backend(
    settings: &LlmSettings,
) -> Result<Arc<dyn CompletionBackend>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(settings.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&settings.model);
    tracing::info!("Using Anthropic (model: {})", settings.model);
    Ok(Arc::new(RigBackend::new(model, "anthropic", settings)))
}
