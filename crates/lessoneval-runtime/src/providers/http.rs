//! JSON-over-HTTPS plumbing shared by the hosted providers.
//!
//! An [`Endpoint`] owns the client, base URL and key for one configured
//! provider, and turns HTTP failures into classified [`ProviderError`]s so
//! the wire modules only deal with their own request and response shapes.

use reqwest::header::HeaderMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;

use super::secrets::{ApiKey, KeySpec};
use super::ProviderError;

/// How the key is attached to each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Auth {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// The key as the value of a named header
    Header(&'static str),
}

pub(crate) struct Endpoint {
    name: String,
    base_url: String,
    key: ApiKey,
    auth: Auth,
    headers: Vec<(&'static str, &'static str)>,
    client: reqwest::Client,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, key: ApiKey, base_url: &str, auth: Auth) -> Self {
        Self {
            name: name.into(),
            base_url: normalize_base_url(base_url),
            key,
            auth,
            headers: Vec::new(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from provider config: `name`, `base_url`, plus the key rules
    /// of `spec`.
    pub fn from_config(
        config: &JsonValue,
        spec: &KeySpec,
        default_name: &str,
        default_url: &str,
        auth: Auth,
    ) -> Result<Self, ProviderError> {
        let key = spec.resolve(config)?;
        Ok(Self::new(
            config["name"].as_str().unwrap_or(default_name),
            key,
            config["base_url"].as_str().unwrap_or(default_url),
            auth,
        ))
    }

    /// Send a fixed header with every request.
    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn key(&self) -> &ApiKey {
        &self.key
    }

    /// POST `body` to `{base_url}/{path}` and decode the JSON reply.
    pub async fn post_json<B, R>(&self, path: &str, body: &B, timeout: Duration) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self
            .client
            .post(format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .timeout(timeout)
            .json(body);
        request = match self.auth {
            Auth::Bearer => request.bearer_auth(self.key.expose()),
            Auth::Header(header) => request.header(header, self.key.expose()),
        };
        for (name, value) in &self.headers {
            request = request.header(*name, *value);
        }

        tracing::trace!(provider = %self.name, path, "Sending completion request");
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let wait = retry_after(response.headers());
            let raw = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), error_message(raw), wait));
        }

        response.json::<R>().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(timeout)
            } else {
                ProviderError::ParseError(e.to_string())
            }
        })
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("key", &self.key)
            .field("auth", &self.auth)
            .finish()
    }
}

/// Static checks a factory runs before creating an endpoint.
pub(crate) fn check_config(config: &JsonValue, spec: &KeySpec) -> Result<(), ProviderError> {
    if !spec.is_resolvable(config) {
        return Err(spec.missing(config));
    }
    match config["base_url"].as_str() {
        Some(url) if !(url.starts_with("https://") || url.starts_with("http://")) => Err(
            ProviderError::NotConfigured(format!("base_url '{}' is not an http(s) URL", url)),
        ),
        _ => Ok(()),
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Both hosted APIs wrap failures as `{"error": {"message": ...}}`; anything
/// else is kept verbatim.
fn error_message(raw: String) -> String {
    match serde_json::from_str::<ErrorEnvelope>(&raw) {
        Ok(envelope) => envelope.error.message,
        Err(_) => raw,
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if e.is_builder() {
        ProviderError::InvalidRequest(e.to_string())
    } else {
        ProviderError::HttpError(e.to_string())
    }
}

/// `retry-after` in whole seconds; HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let seconds = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    seconds.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, RETRY_AFTER};
    use serde_json::json;

    const SPEC: KeySpec = KeySpec::new("Test key", "LESSONEVAL_HTTP_TEST_UNSET");

    #[test]
    fn test_from_config_trims_base_url() {
        let endpoint = Endpoint::from_config(
            &json!({ "name": "deepseek", "api_key": "k", "base_url": "https://api.deepseek.com/v1/" }),
            &SPEC,
            "openai",
            "https://api.openai.com/v1",
            Auth::Bearer,
        )
        .unwrap();
        assert_eq!(endpoint.name(), "deepseek");
        assert_eq!(endpoint.base_url(), "https://api.deepseek.com/v1");
    }

    #[test]
    fn test_debug_hides_key() {
        let endpoint = Endpoint::new(
            "claude",
            ApiKey::inline("sk-ant-very-secret", "Anthropic API key"),
            "https://api.anthropic.com/v1",
            Auth::Header("x-api-key"),
        );
        let debug = format!("{:?}", endpoint);
        assert!(!debug.contains("sk-ant-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_check_config() {
        assert!(check_config(&json!({ "api_key": "k" }), &SPEC).is_ok());
        assert!(check_config(&json!({ "api_key": "k", "base_url": "ftp://nope" }), &SPEC).is_err());

        let err = check_config(&json!({}), &SPEC).unwrap_err();
        assert!(err.to_string().contains("LESSONEVAL_HTTP_TEST_UNSET"));
    }

    #[test]
    fn test_error_message_unwraps_envelope() {
        assert_eq!(
            error_message(r#"{"error":{"type":"overloaded_error","message":"Overloaded"}}"#.into()),
            "Overloaded"
        );
        assert_eq!(error_message("<html>Bad Gateway</html>".into()), "<html>Bad Gateway</html>");
    }

    #[test]
    fn test_retry_after_seconds_only() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(12)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }
}
