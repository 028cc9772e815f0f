//! Bounded exponential backoff for provider calls.
//!
//! Only transient errors are retried (see [`ProviderError::is_transient`]).
//! The delay before retry `k` is `base_delay * multiplier^(k-1)`, capped at
//! `max_delay`, with no jitter. A rate-limit reply that names a wait
//! stretches that delay to the server's figure, still capped at `max_delay`.

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::config::duration;
use crate::providers::ProviderError;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration")]
    pub base_delay: Duration,

    /// Upper bound on any single delay
    #[serde(with = "duration")]
    pub max_delay: Duration,

    pub multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(15),
            max_delay: Duration::from_secs(600),
            multiplier: 2.0,
        }
    }
}

/// Retry outcome when the operation never succeeded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryError {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: ProviderError,
    },

    #[error("non-retryable failure on attempt {attempts}: {source}")]
    Fatal {
        attempts: u32,
        #[source]
        source: ProviderError,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Fatal { attempts, .. } => *attempts,
        }
    }

    /// The last provider error seen.
    pub fn provider_error(&self) -> &ProviderError {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal { source, .. } => source,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

/// A successful value and how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1) as i32;
        let scaled = self.base_delay.as_secs_f64() * (self.multiplier as f64).powi(exp);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Delay actually slept after `error`, given the scheduled one.
    fn adjusted(&self, error: &ProviderError, scheduled: Duration) -> Duration {
        match error.retry_after() {
            Some(hint) => scheduled.max(hint).min(self.max_delay),
            None => scheduled,
        }
    }

    /// The full delay schedule between attempts.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts.max(1)).map(|k| self.delay_for(k)).collect()
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.multiplier)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `op` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `label` identifies the call in logs.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<Retried<T>, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = AtomicU32::new(0);

        let result = (|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            op()
        })
        .retry(self.backoff())
        .sleep(tokio::time::sleep)
        .when(|e: &ProviderError| e.is_transient())
        .adjust(|e: &ProviderError, scheduled: Option<Duration>| {
            scheduled.map(|d| self.adjusted(e, d))
        })
        .notify(|e: &ProviderError, delay: Duration| {
            tracing::warn!(
                call = label,
                attempt = attempts.load(Ordering::SeqCst),
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Transient provider failure, retrying"
            );
        })
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(value) => Ok(Retried { value, attempts }),
            Err(e) if e.is_transient() => Err(RetryError::Exhausted { attempts, last: e }),
            Err(e) => Err(RetryError::Fatal {
                attempts,
                source: e,
            }),
        }
    }
}
