//! Resilience patterns for provider calls.
//!
//! Retry with bounded exponential backoff. Per-attempt timeouts and the
//! evaluation-wide deadline are enforced by the agents and orchestrator.

mod retry;

pub use retry::{Retried, RetryError, RetryPolicy};
