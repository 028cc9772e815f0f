//! The provider-backed dimension agent.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

use lessoneval_core::{
    parse_dimension_response, DimensionResult, DimensionSpec, DimensionStatus, EvaluationRequest,
};

use super::traits::{AgentState, DimensionAgent};
use crate::prompts::PromptLibrary;
use crate::providers::{ProviderBinding, ProviderError};
use crate::resilience::{RetryError, RetryPolicy};

/// Binds one rubric dimension to one provider and prompt template.
#[derive(Debug, Clone)]
pub struct RubricAgent {
    spec: DimensionSpec,
    binding: ProviderBinding,
    prompts: Arc<PromptLibrary>,
    retry: RetryPolicy,
}

impl RubricAgent {
    pub fn new(
        spec: DimensionSpec,
        binding: ProviderBinding,
        prompts: Arc<PromptLibrary>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            spec,
            binding,
            prompts,
            retry,
        }
    }

    fn transition(&self, from: AgentState, to: AgentState) {
        tracing::debug!(
            dimension = %self.spec.id,
            provider = %self.binding.id,
            from = %from,
            to = %to,
            "Agent state transition"
        );
    }

    fn finish(&self, result: DimensionResult) -> DimensionResult {
        let state = AgentState::from_status(result.status);
        self.transition(AgentState::InFlight, state);
        match state {
            AgentState::Succeeded => tracing::info!(
                dimension = %self.spec.id,
                provider = %self.binding.id,
                score = result.score.unwrap_or_default(),
                attempts = result.attempts,
                elapsed_ms = result.elapsed_ms,
                "Dimension evaluated"
            ),
            _ => tracing::warn!(
                dimension = %self.spec.id,
                provider = %self.binding.id,
                status = %result.status,
                attempts = result.attempts,
                error = result.error.as_deref().unwrap_or_default(),
                "Dimension unavailable"
            ),
        }
        result
    }
}

#[async_trait]
impl DimensionAgent for RubricAgent {
    fn spec(&self) -> &DimensionSpec {
        &self.spec
    }

    fn provider_id(&self) -> &str {
        &self.binding.id
    }

    async fn evaluate(&self, request: &EvaluationRequest) -> DimensionResult {
        let start = Instant::now();
        let dimension = self.spec.id.clone();
        let provider_id = self.binding.id.as_str();
        self.transition(AgentState::NotStarted, AgentState::InFlight);

        let messages = match self.prompts.dimension_messages(request, &self.spec) {
            Ok(messages) => messages,
            Err(e) => {
                return self.finish(DimensionResult::failed(
                    dimension,
                    provider_id,
                    DimensionStatus::Internal,
                    e.to_string(),
                    start.elapsed(),
                    0,
                ))
            }
        };

        let call_timeout = self.binding.completion.timeout;
        let label = format!("{}/{}", dimension, provider_id);
        let outcome = self
            .retry
            .run(&label, || {
                let messages = messages.clone();
                async move {
                    tokio::time::timeout(
                        call_timeout,
                        self.binding.provider.complete(messages, &self.binding.completion),
                    )
                    .await
                    .unwrap_or(Err(ProviderError::Timeout(call_timeout)))
                }
            })
            .await;

        let result = match outcome {
            Ok(retried) => {
                let response = retried.value;
                let result = match parse_dimension_response(&response.content) {
                    Ok(parsed) => DimensionResult::succeeded(
                        dimension,
                        provider_id,
                        parsed,
                        start.elapsed(),
                        retried.attempts,
                    ),
                    Err(e) => DimensionResult::failed(
                        dimension,
                        provider_id,
                        DimensionStatus::ParseFailed,
                        e.to_string(),
                        start.elapsed(),
                        retried.attempts,
                    )
                    .with_raw_response(response.content),
                };
                result.with_usage(response.usage)
            }
            Err(e @ RetryError::Exhausted { .. }) => DimensionResult::failed(
                dimension,
                provider_id,
                DimensionStatus::RetriesExhausted,
                e.to_string(),
                start.elapsed(),
                e.attempts(),
            ),
            Err(e @ RetryError::Fatal { .. }) => DimensionResult::failed(
                dimension,
                provider_id,
                DimensionStatus::ProviderRejected,
                e.provider_error().to_string(),
                start.elapsed(),
                e.attempts(),
            ),
        };

        self.finish(result)
    }
}
