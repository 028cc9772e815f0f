//! Dimension agent trait and lifecycle states.

use async_trait::async_trait;
use std::fmt;

use lessoneval_core::{DimensionId, DimensionResult, DimensionSpec, DimensionStatus, EvaluationRequest};

/// Lifecycle of one agent invocation.
///
/// `NotStarted → InFlight → {Succeeded, FailedTransientExhausted, FailedFatal, FailedParse}`.
/// `FailedTimeout` is assigned by the orchestrator when its deadline cuts an
/// invocation short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    NotStarted,
    InFlight,
    Succeeded,
    FailedTransientExhausted,
    FailedFatal,
    FailedParse,
    FailedTimeout,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AgentState::NotStarted | AgentState::InFlight)
    }

    /// Terminal state reported for a finished result.
    pub fn from_status(status: DimensionStatus) -> Self {
        match status {
            DimensionStatus::Succeeded => AgentState::Succeeded,
            DimensionStatus::RetriesExhausted => AgentState::FailedTransientExhausted,
            DimensionStatus::ProviderRejected | DimensionStatus::Internal => AgentState::FailedFatal,
            DimensionStatus::ParseFailed => AgentState::FailedParse,
            DimensionStatus::TimedOut => AgentState::FailedTimeout,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::NotStarted => "not_started",
            AgentState::InFlight => "in_flight",
            AgentState::Succeeded => "succeeded",
            AgentState::FailedTransientExhausted => "failed_transient_exhausted",
            AgentState::FailedFatal => "failed_fatal",
            AgentState::FailedParse => "failed_parse",
            AgentState::FailedTimeout => "failed_timeout",
        };
        f.write_str(s)
    }
}

/// Evaluates one rubric dimension.
///
/// # Isolation Contract
/// - MUST NOT read or write other dimensions' results
/// - MUST NOT mutate shared state
/// - MUST NOT return an error: every failure becomes a failed
///   [`DimensionResult`] with a distinct status
#[async_trait]
pub trait DimensionAgent: Send + Sync {
    /// The dimension this agent is bound to.
    fn spec(&self) -> &DimensionSpec;

    /// Provider id the agent calls.
    fn provider_id(&self) -> &str;

    fn dimension(&self) -> &DimensionId {
        &self.spec().id
    }

    /// Evaluate the lesson for this dimension.
    async fn evaluate(&self, request: &EvaluationRequest) -> DimensionResult;
}
