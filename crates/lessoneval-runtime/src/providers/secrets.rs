//! API keys for the HTTP providers.
//!
//! A [`KeySpec`] says where a provider looks for its key: an inline
//! `api_key` entry in the provider config, else the environment variable
//! named by `api_key_env`, else the provider's default variable. Resolving
//! it yields an [`ApiKey`], which keeps the value in a [`SecretString`] and
//! prints only its label and origin.
//!
//! ```ignore
//! const KEY: KeySpec = KeySpec::new("DeepSeek API key", "DEEPSEEK_API_KEY");
//! let key = KEY.resolve(&config)?;
//! request.bearer_auth(key.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a resolved key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Passed directly to a constructor
    Inline,
    /// `api_key` entry of the provider config
    Config,
    /// Named environment variable
    Env(String),
}

impl fmt::Display for KeyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOrigin::Inline => f.write_str("inline"),
            KeyOrigin::Config => f.write_str("config"),
            KeyOrigin::Env(var) => write!(f, "${}", var),
        }
    }
}

/// Lookup rules for one provider's key.
#[derive(Debug, Clone, Copy)]
pub struct KeySpec {
    /// Human label used in errors and logs, e.g. "Anthropic API key"
    pub label: &'static str,
    /// Variable read when the config names none
    pub default_env: &'static str,
}

impl KeySpec {
    pub const fn new(label: &'static str, default_env: &'static str) -> Self {
        Self { label, default_env }
    }

    /// Environment variable consulted for `config`.
    pub fn env_var<'a>(&self, config: &'a JsonValue) -> &'a str {
        config["api_key_env"].as_str().unwrap_or(self.default_env)
    }

    /// Resolve the key, preferring the inline config entry.
    ///
    /// Blank values count as missing.
    pub fn resolve(&self, config: &JsonValue) -> Result<ApiKey, ProviderError> {
        if let Some(inline) = non_blank(config["api_key"].as_str()) {
            return Ok(ApiKey::with_origin(inline, self.label, KeyOrigin::Config));
        }

        let var = self.env_var(config);
        match std::env::var(var) {
            Ok(value) if non_blank(Some(&value)).is_some() => Ok(ApiKey::with_origin(
                value,
                self.label,
                KeyOrigin::Env(var.to_string()),
            )),
            _ => Err(self.missing(config)),
        }
    }

    /// Whether [`resolve`](Self::resolve) would succeed.
    pub fn is_resolvable(&self, config: &JsonValue) -> bool {
        non_blank(config["api_key"].as_str()).is_some()
            || std::env::var(self.env_var(config)).is_ok_and(|v| !v.trim().is_empty())
    }

    pub fn missing(&self, config: &JsonValue) -> ProviderError {
        ProviderError::NotConfigured(format!(
            "{} required: set 'api_key' in config or the {} environment variable",
            self.label,
            self.env_var(config)
        ))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// A provider API key. Only [`ApiKey::expose`] reveals the value.
pub struct ApiKey {
    secret: SecretString,
    label: &'static str,
    origin: KeyOrigin,
}

impl ApiKey {
    /// Wrap a key handed over by the caller.
    pub fn inline(value: impl Into<String>, label: &'static str) -> Self {
        Self::with_origin(value, label, KeyOrigin::Inline)
    }

    fn with_origin(value: impl Into<String>, label: &'static str, origin: KeyOrigin) -> Self {
        Self {
            secret: SecretString::from(value.into()),
            label,
            origin,
        }
    }

    /// The raw key, for setting an auth header.
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn is_blank(&self) -> bool {
        self.expose().trim().is_empty()
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn origin(&self) -> &KeyOrigin {
        &self.origin
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({} via {}, [REDACTED])", self.label, self.origin)
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.origin)
    }
}
