//! Runtime configuration.
//!
//! `RuntimeConfig` is loaded once (file, then environment overrides at the
//! CLI boundary) and shared immutably with the orchestrator.
//!
//! ```yaml
//! call_timeout: 3m
//! deadline: 30m
//! retry:
//!   max_attempts: 5
//!   base_delay: 15s
//! providers:
//!   claude:
//!     kind: anthropic
//!     model: claude-sonnet-4-20250514
//! disabled_dimensions: [lesson_design_quality]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::providers::CompletionConfig;
use crate::resilience::RetryPolicy;

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for durations written as `"15s"`, `"3m"` or bare seconds.
pub mod duration {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => parse(&text).map_err(de::Error::custom),
        }
    }

    /// Parse a humantime string; bare integers are seconds.
    pub fn parse(text: &str) -> Result<Duration, String> {
        let text = text.trim();
        if let Ok(secs) = text.parse::<u64>() {
            return Ok(Duration::from_secs(secs));
        }
        humantime::parse_duration(text).map_err(|e| format!("'{}': {}", text, e))
    }
}

/// One configured provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Factory kind: "anthropic", "openai" or "mock"
    pub kind: String,

    pub enabled: bool,

    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Environment variable holding the API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    pub max_tokens: u32,

    pub temperature: f32,

    pub prompt_caching: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: "openai".to_string(),
            enabled: true,
            model: "gpt-4o".to_string(),
            base_url: None,
            api_key_env: None,
            max_tokens: 4000,
            temperature: 0.7,
            prompt_caching: false,
        }
    }
}

impl ProviderSettings {
    fn new(kind: &str, model: &str) -> Self {
        Self {
            kind: kind.to_string(),
            model: model.to_string(),
            ..Default::default()
        }
    }

    /// JSON handed to the provider factory for this instance.
    pub fn factory_config(&self, id: &str) -> JsonValue {
        let mut config = serde_json::json!({ "name": id, "model": self.model });
        if let Some(url) = &self.base_url {
            config["base_url"] = JsonValue::from(url.as_str());
        }
        if let Some(env) = &self.api_key_env {
            config["api_key_env"] = JsonValue::from(env.as_str());
        }
        config
    }

    /// Per-request settings for calls through this instance.
    pub fn completion_config(&self, timeout: Duration) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout,
            prompt_caching: self.prompt_caching,
        }
    }
}

/// Debate-mode settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateConfig {
    /// Run the consensus pass by default
    pub enabled: bool,

    pub moderator_provider: String,

    /// Bound on each cross-review and the moderator call, retries included
    #[serde(with = "duration")]
    pub review_timeout: Duration,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            moderator_provider: "gpt".to_string(),
            review_timeout: Duration::from_secs(300),
        }
    }
}

/// Immutable runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Provider id to settings
    pub providers: BTreeMap<String, ProviderSettings>,

    pub retry: RetryPolicy,

    /// Hard timeout for one provider call
    #[serde(with = "duration")]
    pub call_timeout: Duration,

    /// Overall bound on a run: the fan-out plus any consensus pass
    #[serde(with = "duration")]
    pub deadline: Duration,

    pub disabled_dimensions: BTreeSet<String>,

    /// When false, any unavailable dimension fails the evaluation
    pub continue_on_failure: bool,

    pub max_recommendations: usize,

    pub debate: DebateConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let mut deepseek = ProviderSettings::new("openai", "deepseek-chat");
        deepseek.base_url = Some("https://api.deepseek.com/v1".to_string());
        deepseek.api_key_env = Some("DEEPSEEK_API_KEY".to_string());

        let mut claude = ProviderSettings::new("anthropic", "claude-sonnet-4-20250514");
        claude.api_key_env = Some("ANTHROPIC_API_KEY".to_string());

        let mut gpt = ProviderSettings::new("openai", "gpt-4o");
        gpt.api_key_env = Some("OPENAI_API_KEY".to_string());

        Self {
            providers: BTreeMap::from([
                ("deepseek".to_string(), deepseek),
                ("claude".to_string(), claude),
                ("gpt".to_string(), gpt),
            ]),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(180),
            deadline: Duration::from_secs(1800),
            disabled_dimensions: BTreeSet::new(),
            continue_on_failure: true,
            max_recommendations: lessoneval_core::DEFAULT_MAX_RECOMMENDATIONS,
            debate: DebateConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Validate internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(invalid("retry.base_delay", "must not exceed retry.max_delay"));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(invalid("retry.multiplier", "must be at least 1.0"));
        }
        if self.call_timeout.is_zero() {
            return Err(invalid("call_timeout", "must be positive"));
        }
        if self.deadline.is_zero() {
            return Err(invalid("deadline", "must be positive"));
        }
        for (id, provider) in &self.providers {
            if provider.kind.trim().is_empty() {
                return Err(invalid(&format!("providers.{}.kind", id), "must not be empty"));
            }
            if provider.max_tokens == 0 {
                return Err(invalid(&format!("providers.{}.max_tokens", id), "must be positive"));
            }
            if !(0.0..=2.0).contains(&provider.temperature) {
                return Err(invalid(
                    &format!("providers.{}.temperature", id),
                    "must be between 0.0 and 2.0",
                ));
            }
        }
        if self.debate.enabled && !self.providers.contains_key(&self.debate.moderator_provider) {
            return Err(ConfigError::Invalid(format!(
                "debate moderator '{}' is not a configured provider",
                self.debate.moderator_provider
            )));
        }
        Ok(())
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderSettings> {
        self.providers.get(id)
    }

    pub fn is_provider_enabled(&self, id: &str) -> bool {
        self.providers.get(id).is_some_and(|p| p.enabled)
    }

    pub fn is_dimension_enabled(&self, id: &str) -> bool {
        !self.disabled_dimensions.contains(id)
    }

    /// Route every provider through the offline mock.
    pub fn use_mock(&mut self) {
        for provider in self.providers.values_mut() {
            provider.kind = "mock".to_string();
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        for (var, id) in [
            ("ENABLE_DEEPSEEK", "deepseek"),
            ("ENABLE_CLAUDE", "claude"),
            ("ENABLE_GPT", "gpt"),
        ] {
            if let Some(value) = get(var) {
                let enabled = parse_bool(var, &value)?;
                if let Some(provider) = self.providers.get_mut(id) {
                    provider.enabled = enabled;
                }
            }
        }

        if let Some(value) = get("API_TIMEOUT") {
            self.call_timeout = parse_duration("API_TIMEOUT", &value)?;
        }
        if let Some(value) = get("API_MAX_RETRIES") {
            self.retry.max_attempts = value.trim().parse().map_err(|_| {
                invalid("API_MAX_RETRIES", &format!("'{}' is not a positive integer", value))
            })?;
        }
        if let Some(value) = get("API_RETRY_DELAY") {
            self.retry.base_delay = parse_duration("API_RETRY_DELAY", &value)?;
            if self.retry.base_delay > self.retry.max_delay {
                self.retry.max_delay = self.retry.base_delay;
            }
        }
        if let Some(value) = get("EVALUATION_DEADLINE") {
            self.deadline = parse_duration("EVALUATION_DEADLINE", &value)?;
        }
        if let Some(value) = get("CONTINUE_ON_API_FAILURE") {
            self.continue_on_failure = parse_bool("CONTINUE_ON_API_FAILURE", &value)?;
        }

        for (var, id) in [
            ("OPENAI_MODEL", "gpt"),
            ("ANTHROPIC_MODEL", "claude"),
            ("DEEPSEEK_MODEL", "deepseek"),
        ] {
            if let (Some(model), Some(provider)) = (get(var), self.providers.get_mut(id)) {
                provider.model = model.trim().to_string();
            }
        }
        if let (Some(url), Some(provider)) = (get("DEEPSEEK_BASE_URL"), self.providers.get_mut("deepseek")) {
            provider.base_url = Some(url.trim().to_string());
        }

        if get("API_MODE").is_some_and(|mode| mode.trim().eq_ignore_ascii_case("mock")) {
            self.use_mock();
        }

        self.validate()
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(key, &format!("'{}' is not a boolean", other))),
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    duration::parse(value).map_err(|e| invalid(key, &e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.call_timeout, Duration::from_secs(180));
        assert_eq!(config.deadline, Duration::from_secs(1800));
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.continue_on_failure);

        let deepseek = config.provider("deepseek").unwrap();
        assert_eq!(deepseek.kind, "openai");
        assert_eq!(deepseek.model, "deepseek-chat");
        assert_eq!(deepseek.base_url.as_deref(), Some("https://api.deepseek.com/v1"));
        assert_eq!(config.provider("claude").unwrap().kind, "anthropic");
        assert_eq!(config.provider("gpt").unwrap().max_tokens, 4000);
    }

    #[test]
    fn test_yaml_with_humantime_durations() {
        let config = RuntimeConfig::from_yaml(
            r#"
call_timeout: 2m
deadline: 900
retry:
  max_attempts: 3
  base_delay: 5s
providers:
  claude:
    kind: mock
    model: claude-test
disabled_dimensions: [lesson_design_quality]
continue_on_failure: false
"#,
        )
        .unwrap();

        assert_eq!(config.call_timeout, Duration::from_secs(120));
        assert_eq!(config.deadline, Duration::from_secs(900));
        assert_eq!(config.retry.base_delay, Duration::from_secs(5));
        assert_eq!(config.retry.max_delay, Duration::from_secs(600));
        assert_eq!(config.providers.len(), 1);
        assert!(config.provider("claude").unwrap().enabled);
        assert!(!config.is_dimension_enabled("lesson_design_quality"));
        assert!(!config.continue_on_failure);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(RuntimeConfig::from_yaml("retry:\n  max_attempts: 0\n").is_err());
        assert!(RuntimeConfig::from_yaml("call_timeout: soon\n").is_err());
        assert!(RuntimeConfig::from_yaml("unknown_key: 1\n").is_err());
        assert!(RuntimeConfig::from_yaml(
            "debate:\n  enabled: true\n  moderator_provider: nobody\n"
        )
        .is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RuntimeConfig::default();
        config
            .apply_env_from(env(&[
                ("ENABLE_CLAUDE", "false"),
                ("API_TIMEOUT", "60"),
                ("API_MAX_RETRIES", "3"),
                ("API_RETRY_DELAY", "2s"),
                ("EVALUATION_DEADLINE", "10m"),
                ("CONTINUE_ON_API_FAILURE", "no"),
                ("OPENAI_MODEL", "gpt-4o-mini"),
                ("DEEPSEEK_BASE_URL", "https://proxy.example.com/v1"),
            ]))
            .unwrap();

        assert!(!config.is_provider_enabled("claude"));
        assert!(config.is_provider_enabled("gpt"));
        assert_eq!(config.call_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(2));
        assert_eq!(config.deadline, Duration::from_secs(600));
        assert!(!config.continue_on_failure);
        assert_eq!(config.provider("gpt").unwrap().model, "gpt-4o-mini");
        assert_eq!(
            config.provider("deepseek").unwrap().base_url.as_deref(),
            Some("https://proxy.example.com/v1")
        );
    }

    #[test]
    fn test_env_mock_mode_and_bad_values() {
        let mut config = RuntimeConfig::default();
        config.apply_env_from(env(&[("API_MODE", "mock")])).unwrap();
        assert!(config.providers.values().all(|p| p.kind == "mock"));

        let mut config = RuntimeConfig::default();
        let err = config
            .apply_env_from(env(&[("ENABLE_GPT", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("ENABLE_GPT"));

        let mut config = RuntimeConfig::default();
        assert!(config.apply_env_from(env(&[("API_MAX_RETRIES", "0")])).is_err());
    }

    #[test]
    fn test_provider_settings_projection() {
        let config = RuntimeConfig::default();
        let deepseek = config.provider("deepseek").unwrap();

        let factory = deepseek.factory_config("deepseek");
        assert_eq!(factory["name"], "deepseek");
        assert_eq!(factory["api_key_env"], "DEEPSEEK_API_KEY");
        assert_eq!(factory["base_url"], "https://api.deepseek.com/v1");

        let completion = deepseek.completion_config(config.call_timeout);
        assert_eq!(completion.model, "deepseek-chat");
        assert_eq!(completion.timeout, Duration::from_secs(180));
        assert_eq!(completion.temperature, 0.7);
    }

    #[test]
    fn test_durations_serialize_readably() {
        let yaml = serde_yaml::to_string(&RuntimeConfig::default()).unwrap();
        assert!(yaml.contains("call_timeout: 3m"));
        let back = RuntimeConfig::from_yaml(&yaml).unwrap();
        assert_eq!(back, RuntimeConfig::default());
    }
}
