//! Debate-mode consensus pass.
//!
//! Round one sends every successful evaluation to each successful
//! dimension's provider for cross-review. Round two asks the moderator to
//! reconcile the initial scores with the reviews. A moderator that fails or
//! replies with unusable JSON is replaced by a deterministic fallback, so
//! the pass always produces a report.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lessoneval_core::{
    ConsensusReport, CrossReview, DimensionResult, DimensionSpec, EvaluationRequest,
    ModeratorVerdict,
};

use crate::config::RuntimeConfig;
use crate::prompts::{cross_review_messages, moderator_messages};
use crate::providers::{ChatMessage, ProviderBinding, ProviderError};
use crate::resilience::RetryPolicy;

/// Runs cross-reviews and moderation over a finished set of results.
#[derive(Debug, Clone)]
pub struct ConsensusPass {
    bindings: Arc<BTreeMap<String, ProviderBinding>>,
    moderator: String,
    retry: RetryPolicy,
    review_timeout: Duration,
}

impl ConsensusPass {
    pub fn new(
        bindings: Arc<BTreeMap<String, ProviderBinding>>,
        moderator: impl Into<String>,
        retry: RetryPolicy,
        review_timeout: Duration,
    ) -> Self {
        Self {
            bindings,
            moderator: moderator.into(),
            retry,
            review_timeout,
        }
    }

    pub fn from_config(bindings: Arc<BTreeMap<String, ProviderBinding>>, config: &RuntimeConfig) -> Self {
        Self::new(
            bindings,
            config.debate.moderator_provider.clone(),
            config.retry.clone(),
            config.debate.review_timeout,
        )
    }

    pub fn moderator(&self) -> &str {
        &self.moderator
    }

    /// Run both rounds. Never fails; see [`ConsensusReport::fallback`].
    pub async fn run(
        &self,
        request: &EvaluationRequest,
        results: &[DimensionResult],
        specs: &[DimensionSpec],
    ) -> ConsensusReport {
        let reviewers: Vec<&DimensionResult> = results.iter().filter(|r| r.is_success()).collect();
        tracing::info!(
            reviewers = reviewers.len(),
            moderator = %self.moderator,
            "Starting consensus pass"
        );

        let reviews = join_all(
            reviewers
                .into_iter()
                .map(|reviewer| self.review(request, reviewer, results)),
        )
        .await;

        match self.moderate(request, results, &reviews, specs).await {
            Ok(verdict) => {
                tracing::info!(
                    moderator = %self.moderator,
                    confidence = %verdict.confidence,
                    "Consensus reached"
                );
                ConsensusReport::from_verdict(reviews, verdict, specs)
            }
            Err(error) => {
                tracing::warn!(
                    moderator = %self.moderator,
                    error = %error,
                    "Moderator failed, using fallback consensus"
                );
                ConsensusReport::fallback(results, reviews, specs, error)
            }
        }
    }

    async fn review(
        &self,
        request: &EvaluationRequest,
        reviewer: &DimensionResult,
        results: &[DimensionResult],
    ) -> CrossReview {
        let Some(binding) = self.bindings.get(&reviewer.provider) else {
            return CrossReview::failed(
                reviewer.dimension.clone(),
                &reviewer.provider,
                "reviewer provider not configured",
            );
        };

        let label = format!("review/{}/{}", reviewer.dimension, binding.id);
        let messages = cross_review_messages(request, reviewer, results);
        let review = match self.call(binding, &label, messages).await {
            Ok(text) => CrossReview::parse(reviewer.dimension.clone(), &binding.id, &text)
                .unwrap_or_else(|e| {
                    CrossReview::failed(reviewer.dimension.clone(), &binding.id, e.to_string())
                }),
            Err(e) => CrossReview::failed(reviewer.dimension.clone(), &binding.id, e),
        };

        if let Some(error) = &review.error {
            tracing::warn!(
                dimension = %review.dimension,
                provider = %review.provider,
                error = %error,
                "Cross-review failed"
            );
        }
        review
    }

    async fn moderate(
        &self,
        request: &EvaluationRequest,
        results: &[DimensionResult],
        reviews: &[CrossReview],
        specs: &[DimensionSpec],
    ) -> Result<ModeratorVerdict, String> {
        let binding = self
            .bindings
            .get(&self.moderator)
            .ok_or_else(|| format!("moderator provider '{}' not configured", self.moderator))?;

        let label = format!("moderator/{}", binding.id);
        let messages = moderator_messages(request, results, reviews, specs);
        let text = self.call(binding, &label, messages).await?;
        ModeratorVerdict::parse(&text).map_err(|e| e.to_string())
    }

    /// One retried completion bounded by the review timeout.
    async fn call(
        &self,
        binding: &ProviderBinding,
        label: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<String, String> {
        let call_timeout = binding.completion.timeout;
        let attempts = self.retry.run(label, || {
            let messages = messages.clone();
            async move {
                tokio::time::timeout(
                    call_timeout,
                    binding.provider.complete(messages, &binding.completion),
                )
                .await
                .unwrap_or(Err(ProviderError::Timeout(call_timeout)))
            }
        });

        match tokio::time::timeout(self.review_timeout, attempts).await {
            Ok(Ok(retried)) => Ok(retried.value.content),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "no reply within {}",
                humantime::format_duration(self.review_timeout)
            )),
        }
    }
}
