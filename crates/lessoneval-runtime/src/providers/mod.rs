//! LLM providers.
//!
//! [`LlmProvider`] is the one seam between evaluation logic and the hosted
//! models. Implementations exist for the Anthropic Messages API, any
//! OpenAI-compatible chat endpoint (OpenAI, DeepSeek) and an offline mock.
//! A [`ProviderBinding`] pairs a configured provider id with the completion
//! settings its calls use.
//!
//! ## Error classification
//!
//! Every [`ProviderError`] is either transient (worth retrying) or fatal.
//! The retry policy consults only [`ProviderError::is_transient`], never
//! the provider's identity.
//!
//! Keys are resolved through [`KeySpec`] and held as [`ApiKey`], which never
//! prints its value.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

mod factory;
mod mock;
pub mod secrets;

#[cfg(any(feature = "anthropic", feature = "openai"))]
mod http;

#[cfg(feature = "anthropic")]
mod anthropic;

#[cfg(feature = "openai")]
mod openai;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use lessoneval_core::TokenUsage;
pub use mock::{MockProvider, MockProviderFactory, MockReply};
pub use secrets::{ApiKey, KeyOrigin, KeySpec};

#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicProvider, AnthropicProviderFactory};

#[cfg(feature = "openai")]
pub use openai::{OpenAiProvider, OpenAiProviderFactory};

/// Failure of one completion call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    HttpError(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-requested wait, when it sent one
        retry_after: Option<Duration>,
    },

    #[error("provider returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("unexpected response shape: {0}")]
    ParseError(String),

    #[error("authentication rejected: {0}")]
    AuthError(String),

    #[error("request could not be built: {0}")]
    InvalidRequest(String),

    #[error("no reply within {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    ///
    /// Transient: timeouts, rate limits, 5xx (including 529 overloaded),
    /// 408 and transport failures. Everything else is fatal.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500 || *status == 408,
            ProviderError::ParseError(_)
            | ProviderError::AuthError(_)
            | ProviderError::InvalidRequest(_)
            | ProviderError::NotConfigured(_) => false,
        }
    }

    /// Wait the server asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Map a non-success HTTP status and its body to an error.
    ///
    /// The body is kept verbatim in the error so provider diagnostics reach
    /// the logs.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = body.into();
        match status {
            401 | 403 => ProviderError::AuthError(format!("{} - {}", status, message)),
            429 => ProviderError::RateLimited {
                message,
                retry_after,
            },
            _ => ProviderError::ApiError { status, message },
        }
    }
}

/// Per-call settings for one provider binding.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Bound on a single HTTP request, retries excluded
    pub timeout: Duration,
    /// Mark prompt blocks cacheable; only the Anthropic wire format uses it
    pub prompt_caching: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_tokens: 4000,
            temperature: 0.7,
            timeout: Duration::from_secs(180),
            prompt_caching: false,
        }
    }
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A completed call: text plus accounting.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
    /// Model that actually answered, which may differ from the one requested
    pub model: String,
    pub stop_reason: Option<String>,
}

/// A chat-completion backend.
///
/// Agents reach models only through this trait; which implementation serves
/// a dimension is decided by the binding it is routed to.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Local readiness probe; never calls the remote API.
    async fn health_check(&self) -> bool;

    /// Instance name, normally the configured provider id.
    fn name(&self) -> &str;

    /// About four characters per token.
    fn estimate_tokens(&self, text: &str) -> u32 {
        u32::try_from(text.chars().count().div_ceil(4)).unwrap_or(u32::MAX)
    }
}

/// A configured provider instance and the settings its calls use.
#[derive(Clone)]
pub struct ProviderBinding {
    /// Provider id from configuration (e.g. "claude")
    pub id: String,
    pub provider: Arc<dyn LlmProvider>,
    pub completion: CompletionConfig,
}

impl ProviderBinding {
    pub fn new(id: impl Into<String>, provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self {
            id: id.into(),
            provider,
            completion,
        }
    }
}

impl std::fmt::Debug for ProviderBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBinding")
            .field("id", &self.id)
            .field("provider", &self.provider.name())
            .field("model", &self.completion.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_serialize_lowercase() {
        let turns = vec![
            ChatMessage::system("You are an evaluator."),
            ChatMessage::user("Evaluate this lesson."),
            ChatMessage::assistant("{\"score\": 80}"),
        ];
        let json = serde_json::to_value(&turns).unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[2]["role"], "assistant");

        let back: ChatMessage = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(back, ChatMessage::user("hi"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::Timeout(Duration::from_secs(180)).is_transient());
        assert!(ProviderError::RateLimited {
            message: "quota".into(),
            retry_after: None
        }
        .is_transient());
        assert!(ProviderError::HttpError("connection reset by peer".into()).is_transient());
        for status in [500, 502, 503, 504, 529, 408] {
            assert!(ProviderError::from_status(status, "", None).is_transient(), "{}", status);
        }
    }

    #[test]
    fn test_fatal_classification() {
        for status in [400, 401, 403, 404, 422] {
            assert!(!ProviderError::from_status(status, "", None).is_transient(), "{}", status);
        }
        assert!(!ProviderError::ParseError("missing choices".into()).is_transient());
        assert!(!ProviderError::NotConfigured("no key".into()).is_transient());
        assert!(!ProviderError::InvalidRequest("bad url".into()).is_transient());
    }

    #[test]
    fn test_from_status_keeps_body() {
        let body = r#"{"error":{"message":"Insufficient Balance"}}"#;
        let err = ProviderError::from_status(402, body, None);
        assert!(err.to_string().contains("Insufficient Balance"));

        let err = ProviderError::from_status(401, "invalid x-api-key", None);
        assert!(matches!(err, ProviderError::AuthError(ref m) if m.contains("invalid x-api-key")));

        let err = ProviderError::from_status(429, "quota exceeded for org-x", Some(Duration::from_secs(7)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert!(err.is_transient());
        assert!(err.to_string().contains("quota exceeded for org-x"));

        let err = ProviderError::from_status(429, "slow down", None);
        assert_eq!(err.retry_after(), None);
        assert!(err.to_string().contains("slow down"));
    }
}
