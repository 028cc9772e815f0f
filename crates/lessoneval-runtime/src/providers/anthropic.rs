//! Claude via the Anthropic Messages API.

use super::{
    factory::ProviderFactory,
    http::{check_config, Auth, Endpoint},
    secrets::{ApiKey, KeySpec},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, Role,
    TokenUsage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;

const KEY: KeySpec = KeySpec::new("Anthropic API key", "ANTHROPIC_API_KEY");
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug)]
pub struct AnthropicProvider {
    endpoint: Endpoint,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::on(Endpoint::new(
            "anthropic",
            ApiKey::inline(api_key, KEY.label),
            DEFAULT_BASE_URL,
            Auth::Header("x-api-key"),
        ))
    }

    /// Build from provider config.
    ///
    /// Reads `name`, `base_url`, `api_key` and `api_key_env`; the key falls
    /// back to `ANTHROPIC_API_KEY`.
    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let endpoint = Endpoint::from_config(
            config,
            &KEY,
            "anthropic",
            DEFAULT_BASE_URL,
            Auth::Header("x-api-key"),
        )?;
        Ok(Self::on(endpoint))
    }

    fn on(endpoint: Endpoint) -> Self {
        Self {
            endpoint: endpoint.with_header("anthropic-version", API_VERSION),
        }
    }
}

/// Request body for `POST /messages`.
///
/// System messages are lifted out of the turn list and joined, since the
/// API takes a single top-level `system` string.
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Turn>,
}

impl<'a> MessagesRequest<'a> {
    fn new(messages: Vec<ChatMessage>, config: &'a CompletionConfig) -> Self {
        let (system, rest): (Vec<_>, Vec<_>) =
            messages.into_iter().partition(|m| m.role == Role::System);

        let system = (!system.is_empty()).then(|| {
            system
                .into_iter()
                .map(|m| m.content)
                .collect::<Vec<_>>()
                .join("\n\n")
        });

        let cache = config.prompt_caching.then_some(Ephemeral::default());
        let messages = rest
            .into_iter()
            .map(|m| Turn {
                role: m.role,
                content: vec![TextBlock::new(m.content, cache)],
            })
            .collect();

        Self {
            model: &config.model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            system,
            messages,
        }
    }
}

#[derive(Debug, Serialize)]
struct Turn {
    role: Role,
    content: Vec<TextBlock>,
}

#[derive(Debug, Serialize)]
struct TextBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<Ephemeral>,
}

impl TextBlock {
    fn new(text: String, cache_control: Option<Ephemeral>) -> Self {
        Self {
            kind: "text",
            text,
            cache_control,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
struct Ephemeral {
    #[serde(rename = "type")]
    kind: &'static str,
}

impl Default for Ephemeral {
    fn default() -> Self {
        Self { kind: "ephemeral" }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ReplyBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

impl MessagesResponse {
    fn into_completion(self) -> CompletionResponse {
        let content = self
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text)
            .collect();

        CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: self.usage.input_tokens,
                completion_tokens: self.usage.output_tokens,
            },
            model: self.model,
            stop_reason: self.stop_reason,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReplyBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let request = MessagesRequest::new(messages, config);
        let reply: MessagesResponse = self
            .endpoint
            .post_json("messages", &request, config.timeout)
            .await?;
        Ok(reply.into_completion())
    }

    async fn health_check(&self) -> bool {
        !self.endpoint.key().is_blank()
    }

    fn name(&self) -> &str {
        self.endpoint.name()
    }
}

/// Factory for the `anthropic` kind.
///
/// ```yaml
/// claude:
///   kind: anthropic
///   model: claude-sonnet-4-20250514
///   api_key_env: ANTHROPIC_API_KEY
/// ```
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn kind(&self) -> &'static str {
        "anthropic"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.validate(config)?;
        Ok(Arc::new(AnthropicProvider::from_config(config)?))
    }

    fn validate(&self, config: &JsonValue) -> Result<(), ProviderError> {
        check_config(config, &KEY)
    }

    fn defaults(&self) -> JsonValue {
        serde_json::json!({
            "model": "claude-sonnet-4-20250514",
            "base_url": DEFAULT_BASE_URL,
            "api_key_env": KEY.default_env,
        })
    }

    fn description(&self) -> &'static str {
        "Anthropic Messages API"
    }
}
