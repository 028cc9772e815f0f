//! Offline provider for tests and `API_MODE=mock` runs.
//!
//! With nothing scripted, the mock answers every prompt with a canned
//! evaluation whose score depends on the `Dimension:` line of the prompt.
//! Cross-review and moderator prompts get canned debate replies. Tests can
//! script exact replies, including errors and stalls, with
//! [`MockProvider::push_reply`].

use super::{
    factory::ProviderFactory, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider,
    ProviderError, TokenUsage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted mock reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this text as the completion
    Text(String),
    /// Fail with this error
    Error(ProviderError),
    /// Never complete; the caller's timeout must fire
    Stall,
}

/// Deterministic in-process provider.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    latency: Duration,
    replies: Mutex<VecDeque<MockReply>>,
    calls: AtomicU32,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latency: Duration::ZERO,
            replies: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        }
    }

    /// Delay every reply by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue scripted replies, consumed in order before canned ones.
    pub fn with_replies(self, replies: impl IntoIterator<Item = MockReply>) -> Self {
        self.replies.lock().extend(replies);
        self
    }

    pub fn push_reply(&self, reply: MockReply) {
        self.replies.lock().push_back(reply);
    }

    /// Number of `complete` calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn canned_reply(messages: &[ChatMessage]) -> String {
        let prompt: String = messages.iter().map(|m| m.content.as_str()).collect();

        if prompt.contains("\"consensus_scores\"") {
            return canned_moderator();
        }
        if prompt.contains("\"adjusted_score\"") {
            return canned_review();
        }

        let dimension = messages
            .iter()
            .flat_map(|m| m.content.lines())
            .find_map(|l| l.trim().strip_prefix("Dimension:"))
            .map(str::trim)
            .unwrap_or_default();
        canned_evaluation(dimension)
    }
}

fn canned_score(dimension: &str) -> u8 {
    if dimension.starts_with("place_based") {
        85
    } else if dimension.starts_with("cultural") {
        78
    } else if dimension.starts_with("critical") {
        82
    } else {
        80
    }
}

fn canned_evaluation(dimension: &str) -> String {
    let score = canned_score(dimension);
    serde_json::json!({
        "score": score,
        "strengths": [
            "Connects learning to a named local place",
            "Builds in student discussion time",
        ],
        "areas_for_improvement": [
            "Deepen engagement with mana whenua perspectives",
        ],
        "recommendations": [
            format!("Strengthen the {} focus with a community partner", dimension.replace('_', " ")),
            "Add a reflective journal task for students",
        ],
        "indicator_scores": { "overall": score },
        "summary": format!("Mock evaluation for {}", if dimension.is_empty() { "lesson" } else { dimension }),
    })
    .to_string()
}

fn canned_review() -> String {
    serde_json::json!({
        "agreements": ["The lesson has a clear local focus"],
        "disagreements": [],
        "new_insights": ["Assessment could draw on community feedback"],
        "adjusted_score": null,
        "score_change_reason": "No change warranted",
    })
    .to_string()
}

fn canned_moderator() -> String {
    serde_json::json!({
        "consensus_scores": {
            "place_based_learning": 85,
            "cultural_responsiveness_integrated": 78,
            "critical_pedagogy": 82,
            "lesson_design_quality": 80,
        },
        "agreements": ["Strong place-based framing"],
        "priority_recommendations": ["Partner with local iwi when planning the field trip"],
        "confidence_level": "HIGH",
        "confidence_reason": "Reviewers broadly agreed",
    })
    .to_string()
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self.replies.lock().pop_front();
        let content = match scripted {
            Some(MockReply::Text(text)) => text,
            Some(MockReply::Error(e)) => return Err(e),
            Some(MockReply::Stall) => std::future::pending().await,
            None => Self::canned_reply(&messages),
        };

        let prompt_tokens = messages
            .iter()
            .map(|m| self.estimate_tokens(&m.content))
            .sum();
        let completion_tokens = self.estimate_tokens(&content);

        Ok(CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
            },
            model: config.model.clone(),
            stop_reason: Some("stop".to_string()),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Factory for mock providers.
///
/// ```json
/// { "name": "claude", "latency_ms": 50 }
/// ```
pub struct MockProviderFactory;

impl ProviderFactory for MockProviderFactory {
    fn kind(&self) -> &'static str {
        "mock"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.validate(config)?;
        let name = config["name"].as_str().unwrap_or("mock");
        let latency = Duration::from_millis(config["latency_ms"].as_u64().unwrap_or(0));
        Ok(Arc::new(MockProvider::new(name).with_latency(latency)))
    }

    fn validate(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !config["latency_ms"].is_null() && config["latency_ms"].as_u64().is_none() {
            return Err(ProviderError::NotConfigured(
                "latency_ms must be a non-negative integer".to_string(),
            ));
        }
        Ok(())
    }

    fn defaults(&self) -> JsonValue {
        serde_json::json!({ "latency_ms": 0 })
    }

    fn description(&self) -> &'static str {
        "Offline mock provider with canned evaluations"
    }
}
