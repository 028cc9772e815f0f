//! Provider construction by kind.
//!
//! A provider *kind* ("anthropic", "openai", "mock") names an API shape; a
//! provider *id* ("claude", "gpt", "deepseek") names a configured instance
//! of a kind. The orchestrator builder asks the registry to turn each
//! configured id into an instance via its kind's factory.
//!
//! ```ignore
//! let registry = ProviderRegistry::builtin();
//! let deepseek = registry.create("openai", &json!({
//!     "name": "deepseek",
//!     "base_url": "https://api.deepseek.com/v1",
//!     "api_key_env": "DEEPSEEK_API_KEY",
//! }))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{LlmProvider, ProviderError};

/// Builds providers of one kind from their JSON settings.
pub trait ProviderFactory: Send + Sync {
    /// Kind name this factory answers to.
    fn kind(&self) -> &'static str;

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError>;

    /// Check settings without building anything.
    fn validate(&self, config: &JsonValue) -> Result<(), ProviderError>;

    /// Settings used when a field is left out.
    fn defaults(&self) -> JsonValue {
        JsonValue::Object(Default::default())
    }

    fn description(&self) -> &'static str;
}

/// Factories indexed by kind.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    by_kind: BTreeMap<&'static str, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    /// An empty registry. Every configured provider stays unbound unless
    /// bound explicitly on the orchestrator builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock plus whichever HTTP kinds were compiled in.
    #[allow(unused_mut)]
    pub fn builtin() -> Self {
        let mut registry = Self::new().with(Arc::new(super::MockProviderFactory));
        #[cfg(feature = "anthropic")]
        {
            registry = registry.with(Arc::new(super::AnthropicProviderFactory));
        }
        #[cfg(feature = "openai")]
        {
            registry = registry.with(Arc::new(super::OpenAiProviderFactory));
        }
        registry
    }

    /// Add a factory, replacing any earlier one of the same kind.
    pub fn with(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        if let Some(previous) = self.by_kind.insert(factory.kind(), factory) {
            tracing::debug!(kind = previous.kind(), "Replaced provider factory");
        }
    }

    fn factory(&self, kind: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.by_kind.get(kind).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "unknown provider kind '{}' (known: {})",
                kind,
                self.kinds().join(", ")
            ))
        })
    }

    pub fn create(&self, kind: &str, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.factory(kind)?.create(config)
    }

    pub fn validate(&self, kind: &str, config: &JsonValue) -> Result<(), ProviderError> {
        self.factory(kind)?.validate(config)
    }

    pub fn defaults(&self, kind: &str) -> Option<JsonValue> {
        self.by_kind.get(kind).map(|f| f.defaults())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.by_kind.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.by_kind.keys().copied().collect()
    }

    /// `(kind, description)` pairs, sorted by kind.
    pub fn catalog(&self) -> Vec<(&'static str, &'static str)> {
        self.by_kind
            .iter()
            .map(|(kind, factory)| (*kind, factory.description()))
            .collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.by_kind.keys()).finish()
    }
}
