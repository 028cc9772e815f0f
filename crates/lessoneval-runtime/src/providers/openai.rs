//! OpenAI-compatible `/chat/completions` provider.
//!
//! Serves OpenAI itself and DeepSeek, which speaks the same protocol under
//! its own base URL and key.

use super::{
    factory::ProviderFactory,
    http::{check_config, Auth, Endpoint},
    secrets::{ApiKey, KeySpec},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

const KEY: KeySpec = KeySpec::new("OpenAI-compatible API key", "OPENAI_API_KEY");
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug)]
pub struct OpenAiProvider {
    endpoint: Endpoint,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new(
                "openai",
                ApiKey::inline(api_key, KEY.label),
                DEFAULT_BASE_URL,
                Auth::Bearer,
            ),
        }
    }

    /// Build from provider config (`name`, `base_url`, `api_key`,
    /// `api_key_env`).
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        Ok(Self {
            endpoint: Endpoint::from_config(config, &KEY, "openai", DEFAULT_BASE_URL, Auth::Bearer)?,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl ChatResponse {
    /// First choice only; the requests never ask for `n > 1`.
    fn into_completion(self, requested_model: &str) -> Result<CompletionResponse, ProviderError> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Err(ProviderError::ParseError("response has no choices".to_string()));
        };

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: self
                .usage
                .map(|u| TokenUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                })
                .unwrap_or_default(),
            model: self
                .model
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| requested_model.to_string()),
            stop_reason: choice.finish_reason,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = ChatRequest {
            model: &config.model,
            messages: &messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        };
        let reply: ChatResponse = self
            .endpoint
            .post_json("chat/completions", &request, config.timeout)
            .await?;
        reply.into_completion(&config.model)
    }

    async fn health_check(&self) -> bool {
        !self.endpoint.key().is_blank()
    }

    fn name(&self) -> &str {
        self.endpoint.name()
    }
}

/// Factory for the `openai` kind.
///
/// ```yaml
/// deepseek:
///   kind: openai
///   model: deepseek-chat
///   base_url: https://api.deepseek.com/v1
///   api_key_env: DEEPSEEK_API_KEY
/// ```
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn kind(&self) -> &'static str {
        "openai"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.validate(config)?;
        Ok(Arc::new(OpenAiProvider::from_config(config)?))
    }

    fn validate(&self, config: &JsonValue) -> Result<(), ProviderError> {
        check_config(config, &KEY)
    }

    fn defaults(&self) -> JsonValue {
        serde_json::json!({
            "model": "gpt-4o",
            "base_url": DEFAULT_BASE_URL,
            "api_key_env": KEY.default_env,
        })
    }

    fn description(&self) -> &'static str {
        "OpenAI-compatible chat completions (OpenAI, DeepSeek)"
    }
}
