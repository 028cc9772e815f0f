//! Evaluation orchestrator.
//!
//! Fans a lesson plan out to one agent per enabled rubric dimension, waits
//! for every agent under an overall deadline and folds the results into a
//! persisted [`EvaluationRecord`]:
//! - One tokio task per dimension in a `JoinSet`
//! - Agents still running at the deadline are aborted and reported as timed out
//! - Composite computed only after join-all, renormalized over successes
//! - Optional consensus pass in debate mode
//! - The record is written as `pending` first and completed exactly once

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;

use lessoneval_core::{
    inspect_lesson, merge_recommendations, ConsensusReport, DimensionId, DimensionResult,
    DimensionStatus,
    EvaluationMode, EvaluationRecord, EvaluationRequest, RequestError, Rubric, RubricError,
    ScoringAggregator, UnavailableDimension, UnavailableReason,
};

use crate::agents::{DimensionAgent, RubricAgent};
use crate::config::{ConfigError, RuntimeConfig};
use crate::consensus::ConsensusPass;
use crate::prompts::{PromptError, PromptLibrary};
use crate::providers::{
    CompletionConfig, LlmProvider, ProviderBinding, ProviderError, ProviderRegistry,
};
use crate::store::{MemoryResultStore, ResultStore, StoreError};

/// Errors from the orchestrator.
///
/// Dimension failures are never errors here; they are reported inside the
/// record. These cover invalid input and infrastructure.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("Unknown provider: '{0}'")]
    UnknownProvider(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rubric error: {0}")]
    Rubric(#[from] RubricError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The evaluation finished but its terminal record could not be saved
    #[error("Evaluation {} finished but was not saved: {source}", record.id)]
    Persist {
        record: Box<EvaluationRecord>,
        source: StoreError,
    },
}

/// Per-call options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationOptions {
    /// Route every enabled dimension to this provider id
    pub provider_override: Option<String>,

    pub mode: EvaluationMode,
}

impl EvaluationOptions {
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider_override = Some(provider.into());
        self
    }

    pub fn with_mode(mut self, mode: EvaluationMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Runs evaluations against a rubric and a set of provider bindings.
pub struct EvaluationOrchestrator {
    rubric: Arc<Rubric>,
    config: Arc<RuntimeConfig>,
    prompts: Arc<PromptLibrary>,
    bindings: Arc<BTreeMap<String, ProviderBinding>>,
    /// Provider id to the reason it has no binding
    unbound: BTreeMap<String, String>,
    store: Arc<dyn ResultStore>,
    aggregator: ScoringAggregator,
}

impl EvaluationOrchestrator {
    pub fn builder() -> EvaluationOrchestratorBuilder {
        EvaluationOrchestratorBuilder::new()
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Ids of providers that can take calls.
    pub fn available_providers(&self) -> Vec<&str> {
        self.bindings.keys().map(String::as_str).collect()
    }

    /// Why a configured provider id has no binding, if it has none.
    pub fn unbound_reason(&self, id: &str) -> Option<&str> {
        self.unbound.get(id).map(String::as_str)
    }

    /// Evaluate a lesson plan.
    ///
    /// Returns the terminal record, whether `completed` or `failed`. `Err`
    /// means the request was rejected or the store failed.
    pub async fn run(
        &self,
        request: EvaluationRequest,
        options: EvaluationOptions,
    ) -> Result<EvaluationRecord, OrchestratorError> {
        request.validate()?;
        if let Some(provider) = &options.provider_override {
            if !self.bindings.contains_key(provider) {
                return Err(OrchestratorError::UnknownProvider(provider.clone()));
            }
        }

        let diagnostics = inspect_lesson(&request.content);
        for issue in &diagnostics.issues {
            tracing::warn!(issue = %issue, "Lesson plan structure issue");
        }
        for warning in &diagnostics.warnings {
            tracing::info!(warning = %warning, "Lesson plan warning");
        }

        let mode = if self.config.debate.enabled {
            EvaluationMode::Debate
        } else {
            options.mode
        };
        let mut record = EvaluationRecord::pending(request, mode);
        self.store.create(&record).await?;

        tracing::info!(
            evaluation_id = %record.id,
            title = %record.request.title,
            mode = %mode,
            provider_override = options.provider_override.as_deref().unwrap_or("none"),
            chars = diagnostics.char_count,
            "Evaluation started"
        );

        let (agents, mut unavailable) = self.plan(options.provider_override.as_deref());
        let launched = agents.len();
        let request = Arc::new(record.request.clone());
        let expires = Instant::now() + self.config.deadline;
        record.results = self.dispatch(agents, Arc::clone(&request), expires).await;

        let mut failed_launches = 0;
        for result in &record.results {
            if let Some(reason) = result.status.unavailable_reason() {
                failed_launches += 1;
                let mut missing = UnavailableDimension::new(result.dimension.clone(), reason);
                if let Some(error) = &result.error {
                    missing = missing.with_detail(error.clone());
                }
                unavailable.push(missing);
            }
        }
        unavailable.sort_by_key(|u| self.position(&u.dimension));
        record.unavailable = unavailable;

        let outcome = if launched == 0 {
            Err("No evaluation dimensions are enabled".to_string())
        } else if !self.config.continue_on_failure && failed_launches > 0 {
            Err(format!(
                "{} of {} dimensions failed and continue_on_failure is off",
                failed_launches, launched
            ))
        } else {
            self.aggregator
                .aggregate(&record.results, &self.rubric.dimensions)
                .map_err(|e| format!("All evaluators failed: {}", e))
        };

        match outcome {
            Ok(composite) => {
                record.recommendations = merge_recommendations(
                    record
                        .results
                        .iter()
                        .filter(|r| r.is_success())
                        .map(|r| &r.recommendations),
                    self.config.max_recommendations,
                );
                if mode == EvaluationMode::Debate {
                    record.consensus = Some(self.consensus(&request, &record.results, expires).await);
                }
                record.complete(composite);
                if record.is_degraded() {
                    tracing::warn!(
                        evaluation_id = %record.id,
                        overall = record.overall_score().unwrap_or_default(),
                        succeeded = launched - failed_launches,
                        unavailable = record.unavailable.len(),
                        "Evaluation completed with missing dimensions"
                    );
                } else {
                    tracing::info!(
                        evaluation_id = %record.id,
                        overall = record.overall_score().unwrap_or_default(),
                        tokens = record.total_usage().total(),
                        "Evaluation completed"
                    );
                }
            }
            Err(error) => {
                tracing::error!(
                    evaluation_id = %record.id,
                    error = %error,
                    "Evaluation failed"
                );
                record.fail(error);
            }
        }

        match self.store.complete(&record).await {
            Ok(()) => Ok(record),
            Err(source) => Err(OrchestratorError::Persist {
                record: Box::new(record),
                source,
            }),
        }
    }

    /// Agents for every enabled dimension, plus the dimensions left out.
    fn plan(
        &self,
        provider_override: Option<&str>,
    ) -> (Vec<Arc<dyn DimensionAgent>>, Vec<UnavailableDimension>) {
        let mut agents: Vec<Arc<dyn DimensionAgent>> = Vec::new();
        let mut unavailable = Vec::new();

        for spec in &self.rubric.dimensions {
            if !self.config.is_dimension_enabled(spec.id.as_str()) {
                unavailable.push(
                    UnavailableDimension::new(spec.id.clone(), UnavailableReason::Disabled)
                        .with_detail("dimension disabled"),
                );
                continue;
            }

            let provider_id = provider_override.unwrap_or(&spec.provider);
            let Some(binding) = self.bindings.get(provider_id) else {
                let detail = self
                    .unbound
                    .get(provider_id)
                    .cloned()
                    .unwrap_or_else(|| "provider not configured".to_string());
                tracing::warn!(
                    dimension = %spec.id,
                    provider = provider_id,
                    detail = %detail,
                    "Dimension skipped"
                );
                unavailable.push(
                    UnavailableDimension::new(spec.id.clone(), UnavailableReason::Disabled)
                        .with_detail(detail),
                );
                continue;
            };

            agents.push(Arc::new(RubricAgent::new(
                spec.clone(),
                binding.clone(),
                Arc::clone(&self.prompts),
                self.config.retry.clone(),
            )));
        }

        (agents, unavailable)
    }

    /// Debate pass over the finished results, cut off at the run deadline.
    async fn consensus(
        &self,
        request: &EvaluationRequest,
        results: &[DimensionResult],
        expires: Instant,
    ) -> ConsensusReport {
        let pass = ConsensusPass::from_config(Arc::clone(&self.bindings), &self.config);
        let specs = &self.rubric.dimensions;
        match tokio::time::timeout_at(expires, pass.run(request, results, specs)).await {
            Ok(report) => report,
            Err(_) => {
                tracing::warn!(
                    deadline_secs = self.config.deadline.as_secs(),
                    "Deadline elapsed during consensus pass"
                );
                ConsensusReport::fallback(
                    results,
                    Vec::new(),
                    specs,
                    "evaluation deadline elapsed before consensus finished",
                )
            }
        }
    }

    /// Run every agent concurrently and collect one result per agent.
    async fn dispatch(
        &self,
        agents: Vec<Arc<dyn DimensionAgent>>,
        request: Arc<EvaluationRequest>,
        expires: Instant,
    ) -> Vec<DimensionResult> {
        let deadline = self.config.deadline;

        let mut pending: HashMap<tokio::task::Id, (DimensionId, String)> = HashMap::new();
        let mut set = JoinSet::new();
        for agent in agents {
            let slot = (agent.dimension().clone(), agent.provider_id().to_string());
            let request = Arc::clone(&request);
            let handle = set.spawn(async move { agent.evaluate(&request).await });
            pending.insert(handle.id(), slot);
        }

        let mut results = Vec::with_capacity(pending.len());
        loop {
            match tokio::time::timeout_at(expires, set.join_next_with_id()).await {
                Ok(Some(Ok((id, result)))) => {
                    pending.remove(&id);
                    results.push(result);
                }
                Ok(Some(Err(e))) => {
                    if let Some((dimension, provider)) = pending.remove(&e.id()) {
                        tracing::error!(dimension = %dimension, error = %e, "Dimension task failed");
                        results.push(DimensionResult::failed(
                            dimension,
                            provider,
                            DimensionStatus::Internal,
                            "dimension task panicked",
                            std::time::Duration::ZERO,
                            0,
                        ));
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        pending = pending.len(),
                        deadline_secs = deadline.as_secs(),
                        "Deadline elapsed, aborting remaining dimensions"
                    );
                    set.abort_all();
                    for (dimension, provider) in std::mem::take(&mut pending).into_values() {
                        results.push(DimensionResult::failed(
                            dimension,
                            provider,
                            DimensionStatus::TimedOut,
                            format!(
                                "no result within {}",
                                humantime::format_duration(deadline)
                            ),
                            deadline,
                            0,
                        ));
                    }
                    break;
                }
            }
        }

        results.sort_by_key(|r| self.position(&r.dimension));
        results
    }

    fn position(&self, dimension: &DimensionId) -> usize {
        self.rubric
            .dimensions
            .iter()
            .position(|s| &s.id == dimension)
            .unwrap_or(usize::MAX)
    }
}

impl std::fmt::Debug for EvaluationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationOrchestrator")
            .field("rubric", &self.rubric.name)
            .field("providers", &self.available_providers())
            .field("unbound", &self.unbound)
            .finish()
    }
}

/// Builder for [`EvaluationOrchestrator`].
pub struct EvaluationOrchestratorBuilder {
    rubric: Option<Rubric>,
    config: RuntimeConfig,
    prompts: Option<PromptLibrary>,
    registry: Option<ProviderRegistry>,
    providers: BTreeMap<String, Arc<dyn LlmProvider>>,
    store: Option<Arc<dyn ResultStore>>,
}

impl EvaluationOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            rubric: None,
            config: RuntimeConfig::default(),
            prompts: None,
            registry: None,
            providers: BTreeMap::new(),
            store: None,
        }
    }

    /// Set the rubric. Defaults to [`Rubric::builtin`].
    pub fn rubric(mut self, rubric: Rubric) -> Self {
        self.rubric = Some(rubric);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the prompt templates. Defaults to [`PromptLibrary::builtin`].
    pub fn prompts(mut self, prompts: PromptLibrary) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Factories used for configured providers. Defaults to
    /// [`ProviderRegistry::builtin`].
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Bind a provider id directly, bypassing the registry.
    pub fn provider(mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.insert(id.into(), provider);
        self
    }

    /// Set the result store. Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the orchestrator.
    ///
    /// Fails on invalid configuration, an invalid rubric, or a dimension
    /// whose prompt template does not exist. A provider that cannot be
    /// created is logged and left unbound; its dimensions are reported as
    /// unavailable on every run.
    pub fn build(self) -> Result<EvaluationOrchestrator, OrchestratorError> {
        let config = self.config;
        config.validate()?;

        let rubric = self.rubric.unwrap_or_else(Rubric::builtin);
        rubric.validate()?;

        let prompts = self.prompts.unwrap_or_else(PromptLibrary::builtin);
        if let Some(spec) = rubric
            .dimensions
            .iter()
            .find(|s| !prompts.contains(&s.prompt_template))
        {
            return Err(PromptError::UnknownTemplate(spec.prompt_template.clone()).into());
        }

        let registry = self.registry.unwrap_or_else(ProviderRegistry::builtin);
        let mut bindings = BTreeMap::new();
        let mut unbound = BTreeMap::new();

        for (id, provider) in self.providers {
            let completion = config
                .provider(&id)
                .map(|p| p.completion_config(config.call_timeout))
                .unwrap_or_else(|| CompletionConfig {
                    timeout: config.call_timeout,
                    ..Default::default()
                });
            if config.provider(&id).is_some_and(|p| !p.enabled) {
                unbound.insert(id, "provider disabled".to_string());
                continue;
            }
            bindings.insert(id.clone(), ProviderBinding::new(id, provider, completion));
        }

        for (id, settings) in &config.providers {
            if bindings.contains_key(id) || unbound.contains_key(id) {
                continue;
            }
            if !settings.enabled {
                unbound.insert(id.clone(), "provider disabled".to_string());
                continue;
            }
            match registry.create(&settings.kind, &settings.factory_config(id)) {
                Ok(provider) => {
                    tracing::debug!(provider = %id, kind = %settings.kind, model = %settings.model, "Provider bound");
                    bindings.insert(
                        id.clone(),
                        ProviderBinding::new(
                            id.clone(),
                            provider,
                            settings.completion_config(config.call_timeout),
                        ),
                    );
                }
                Err(e) => {
                    tracing::warn!(provider = %id, kind = %settings.kind, error = %e, "Provider not configured");
                    let reason = match e {
                        ProviderError::NotConfigured(_) => e.to_string(),
                        other => format!("provider not configured: {}", other),
                    };
                    unbound.insert(id.clone(), reason);
                }
            }
        }

        let store = self.store.unwrap_or_else(|| {
            Arc::new(MemoryResultStore::new().with_aliases(rubric.aliases.clone()))
        });

        Ok(EvaluationOrchestrator {
            rubric: Arc::new(rubric),
            config: Arc::new(config),
            prompts: Arc::new(prompts),
            bindings: Arc::new(bindings),
            unbound,
            store,
            aggregator: ScoringAggregator::new(),
        })
    }
}

impl Default for EvaluationOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MockProvider, MockReply, ProviderError};
    use async_trait::async_trait;
    use lessoneval_core::EvaluationStatus;
    use std::time::Duration;
    use uuid::Uuid;

    fn request() -> EvaluationRequest {
        EvaluationRequest::new(
            "Harbour study",
            "Students walk to the Waitematā harbour and interview kaumātua about how the coastline has changed.",
        )
        .with_grade_level("Year 7")
        .with_subject_area("Social Studies")
    }

    fn scored(score: u8) -> MockReply {
        MockReply::Text(format!(
            "{{\"score\": {}, \"recommendations\": [\"Invite a local historian to the class\"]}}",
            score
        ))
    }

    fn mocks() -> (Arc<MockProvider>, Arc<MockProvider>, Arc<MockProvider>) {
        (
            Arc::new(MockProvider::new("deepseek")),
            Arc::new(MockProvider::new("claude")),
            Arc::new(MockProvider::new("gpt")),
        )
    }

    fn orchestrator(
        deepseek: Arc<MockProvider>,
        claude: Arc<MockProvider>,
        gpt: Arc<MockProvider>,
        config: RuntimeConfig,
    ) -> EvaluationOrchestrator {
        EvaluationOrchestrator::builder()
            .config(config)
            .registry(ProviderRegistry::new())
            .provider("deepseek", deepseek)
            .provider("claude", claude)
            .provider("gpt", gpt)
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_evaluation_renormalizes() {
        let (deepseek, claude, gpt) = mocks();
        deepseek.push_reply(scored(80));
        claude.push_reply(scored(60));
        // gpt serves critical_pedagogy and lesson_design_quality; both fail fatally
        gpt.push_reply(MockReply::Error(ProviderError::AuthError("bad key".into())));
        gpt.push_reply(MockReply::Error(ProviderError::AuthError("bad key".into())));
        let orchestrator = orchestrator(deepseek, claude, gpt, RuntimeConfig::default());

        let record = orchestrator
            .run(request(), EvaluationOptions::default())
            .await
            .unwrap();

        assert_eq!(record.status, EvaluationStatus::Completed);
        // (0.25×80 + 0.35×60) / 0.6 = 68.33
        assert_eq!(record.overall_score(), Some(68));
        let composite = record.composite.as_ref().unwrap();
        assert!((composite.weight_sum() - 1.0).abs() < 1e-9);
        assert_eq!(record.results.len(), 4);
        assert_eq!(record.results[0].dimension.as_str(), "place_based_learning");
        assert_eq!(record.unavailable.len(), 2);
        assert!(record
            .unavailable
            .iter()
            .all(|u| u.reason == UnavailableReason::ProviderRejected));
        assert!(record.is_degraded());
        assert_eq!(record.recommendations, vec!["Invite a local historian to the class"]);

        let stored = orchestrator.store().get(record.id).await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_sibling_does_not_cancel_others() {
        let (_, claude, gpt) = mocks();
        let deepseek = Arc::new(
            MockProvider::new("deepseek")
                .with_latency(Duration::from_secs(20))
                .with_replies([scored(90)]),
        );
        claude.push_reply(MockReply::Error(ProviderError::InvalidRequest("prompt too long".into())));
        let orchestrator = orchestrator(deepseek.clone(), claude.clone(), gpt, RuntimeConfig::default());

        let record = orchestrator
            .run(request(), EvaluationOptions::default())
            .await
            .unwrap();

        assert_eq!(claude.calls(), 1);
        assert_eq!(deepseek.calls(), 1);
        let place = record.result_for("place_based_learning").unwrap();
        assert_eq!(place.score, Some(90.0));
        let cultural = record.result_for("cultural_responsiveness_integrated").unwrap();
        assert_eq!(cultural.status, DimensionStatus::ProviderRejected);
        assert_eq!(cultural.attempts, 1);
        assert_eq!(record.status, EvaluationStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_stalled_dimension() {
        let (deepseek, _, gpt) = mocks();
        let claude = Arc::new(MockProvider::new("claude").with_latency(Duration::from_secs(3600)));
        let config = RuntimeConfig {
            deadline: Duration::from_secs(60),
            call_timeout: Duration::from_secs(7200),
            ..Default::default()
        };
        let orchestrator = orchestrator(deepseek, claude, gpt, config);
        let start = Instant::now();

        let record = orchestrator
            .run(request(), EvaluationOptions::default())
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(120));
        let cultural = record.result_for("cultural_responsiveness_integrated").unwrap();
        assert_eq!(cultural.status, DimensionStatus::TimedOut);
        assert_eq!(record.unavailable.len(), 1);
        assert_eq!(record.unavailable[0].reason, UnavailableReason::Timeout);
        // 0.25×85 + 0.25×82 + 0.15×80 over 0.65
        assert_eq!(record.overall_score(), Some(83));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_dimensions_failing_fails_record() {
        let fatal = || MockReply::Error(ProviderError::AuthError("revoked".into()));
        let deepseek = Arc::new(MockProvider::new("deepseek").with_replies([fatal()]));
        let claude = Arc::new(MockProvider::new("claude").with_replies([fatal()]));
        let gpt = Arc::new(MockProvider::new("gpt").with_replies([fatal(), fatal()]));
        let orchestrator = orchestrator(deepseek, claude, gpt, RuntimeConfig::default());

        let record = orchestrator
            .run(request(), EvaluationOptions::default())
            .await
            .unwrap();

        assert_eq!(record.status, EvaluationStatus::Failed);
        assert!(record.composite.is_none());
        assert!(record.error.as_deref().unwrap().starts_with("All evaluators failed"));
        assert_eq!(record.unavailable.len(), 4);
        assert!(record.recommendations.is_empty());
        let stored = orchestrator.store().get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EvaluationStatus::Failed);
    }

    #[tokio::test]
    async fn test_disabled_dimension_and_provider() {
        let (deepseek, claude, gpt) = mocks();
        let mut config = RuntimeConfig::default();
        config
            .disabled_dimensions
            .insert("lesson_design_quality".to_string());
        if let Some(claude) = config.providers.get_mut("claude") {
            claude.enabled = false;
        }
        let orchestrator = orchestrator(deepseek, claude.clone(), gpt, config);

        let record = orchestrator
            .run(request(), EvaluationOptions::default())
            .await
            .unwrap();

        assert_eq!(claude.calls(), 0);
        assert_eq!(record.results.len(), 2);
        let reasons: Vec<(&str, UnavailableReason)> = record
            .unavailable
            .iter()
            .map(|u| (u.dimension.as_str(), u.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("cultural_responsiveness_integrated", UnavailableReason::Disabled),
                ("lesson_design_quality", UnavailableReason::Disabled),
            ]
        );
        // 0.25×85 + 0.25×82 over 0.5
        assert_eq!(record.overall_score(), Some(84));
    }

    #[tokio::test]
    async fn test_provider_override_routes_every_dimension() {
        let (deepseek, claude, gpt) = mocks();
        let orchestrator = orchestrator(deepseek.clone(), claude.clone(), gpt.clone(), RuntimeConfig::default());

        let record = orchestrator
            .run(request(), EvaluationOptions::default().with_provider("claude"))
            .await
            .unwrap();

        assert_eq!(claude.calls(), 4);
        assert_eq!(deepseek.calls() + gpt.calls(), 0);
        assert!(record.results.iter().all(|r| r.provider == "claude"));
        // Each dimension still used its own prompt
        assert_eq!(record.result_for("place_based_learning").unwrap().score, Some(85.0));
        assert_eq!(record.result_for("critical_pedagogy").unwrap().score, Some(82.0));

        let unknown = orchestrator
            .run(request(), EvaluationOptions::default().with_provider("mistral"))
            .await;
        assert!(matches!(unknown, Err(OrchestratorError::UnknownProvider(_))));
    }

    #[tokio::test]
    async fn test_debate_mode_attaches_consensus() {
        let (deepseek, claude, gpt) = mocks();
        let orchestrator = orchestrator(deepseek, claude, gpt.clone(), RuntimeConfig::default());

        let record = orchestrator
            .run(
                request(),
                EvaluationOptions::default().with_mode(EvaluationMode::Debate),
            )
            .await
            .unwrap();

        assert_eq!(record.mode, EvaluationMode::Debate);
        let consensus = record.consensus.as_ref().unwrap();
        assert!(!consensus.fallback);
        assert_eq!(consensus.reviews.len(), 4);
        // Composite is untouched by the debate
        assert_eq!(record.overall_score(), Some(81));
        // Two dimensions, two reviews and the moderator
        assert_eq!(gpt.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debate_cut_off_at_deadline() {
        let (deepseek, claude, _) = mocks();
        let gpt = Arc::new(MockProvider::new("gpt").with_replies([
            scored(70),
            scored(70),
            MockReply::Stall,
            MockReply::Stall,
            MockReply::Stall,
        ]));
        let config = RuntimeConfig {
            deadline: Duration::from_secs(60),
            ..Default::default()
        };
        let orchestrator = orchestrator(deepseek, claude, gpt, config);
        let start = Instant::now();

        let record = orchestrator
            .run(
                request(),
                EvaluationOptions::default().with_mode(EvaluationMode::Debate),
            )
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(61));
        assert_eq!(record.status, EvaluationStatus::Completed);
        assert!(record.unavailable.is_empty());
        let consensus = record.consensus.as_ref().unwrap();
        assert!(consensus.fallback);
        assert!(consensus
            .moderator_error
            .as_deref()
            .unwrap()
            .contains("deadline"));
    }

    struct PanickingProvider;

    #[async_trait]
    impl LlmProvider for PanickingProvider {
        async fn complete(
            &self,
            _messages: Vec<crate::providers::ChatMessage>,
            _config: &CompletionConfig,
        ) -> Result<crate::providers::CompletionResponse, ProviderError> {
            panic!("provider bug")
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "claude"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicked_task_reported_internal_before_deadline() {
        let deepseek = Arc::new(MockProvider::new("deepseek"));
        let gpt = Arc::new(MockProvider::new("gpt").with_latency(Duration::from_secs(3600)));
        let config = RuntimeConfig {
            deadline: Duration::from_secs(60),
            call_timeout: Duration::from_secs(7200),
            ..Default::default()
        };
        let orchestrator = EvaluationOrchestrator::builder()
            .config(config)
            .registry(ProviderRegistry::new())
            .provider("deepseek", deepseek)
            .provider("claude", Arc::new(PanickingProvider))
            .provider("gpt", gpt)
            .build()
            .unwrap();

        let record = orchestrator
            .run(request(), EvaluationOptions::default())
            .await
            .unwrap();

        let cultural = record.result_for("cultural_responsiveness_integrated").unwrap();
        assert_eq!(cultural.status, DimensionStatus::Internal);
        assert_eq!(cultural.provider, "claude");
        assert_eq!(
            record.result_for("critical_pedagogy").unwrap().status,
            DimensionStatus::TimedOut
        );
        assert!(record
            .unavailable
            .iter()
            .any(|u| u.dimension.as_str() == "cultural_responsiveness_integrated"
                && u.reason == UnavailableReason::Internal));
        assert_eq!(record.overall_score(), Some(85));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_on_failure_off_fails_degraded_run() {
        let (deepseek, claude, gpt) = mocks();
        claude.push_reply(MockReply::Error(ProviderError::AuthError("bad key".into())));
        let config = RuntimeConfig {
            continue_on_failure: false,
            ..Default::default()
        };
        let orchestrator = orchestrator(deepseek, claude, gpt, config);

        let record = orchestrator
            .run(request(), EvaluationOptions::default())
            .await
            .unwrap();

        assert_eq!(record.status, EvaluationStatus::Failed);
        assert!(record.error.unwrap().contains("continue_on_failure"));
    }

    #[tokio::test]
    async fn test_empty_content_rejected() {
        let (deepseek, claude, gpt) = mocks();
        let orchestrator = orchestrator(deepseek, claude, gpt, RuntimeConfig::default());

        let result = orchestrator
            .run(EvaluationRequest::new("Blank", "   "), EvaluationOptions::default())
            .await;
        assert!(matches!(result, Err(OrchestratorError::InvalidRequest(_))));
        assert_eq!(orchestrator.store().statistics().await.unwrap().total, 0);
    }

    #[test]
    fn test_unknown_template_rejected_at_build() {
        let mut rubric = Rubric::builtin();
        rubric.dimensions[0].prompt_template = "missing_template".to_string();

        let result = EvaluationOrchestrator::builder()
            .rubric(rubric)
            .registry(ProviderRegistry::new())
            .build();
        assert!(matches!(
            result,
            Err(OrchestratorError::Prompt(PromptError::UnknownTemplate(name))) if name == "missing_template"
        ));
    }

    #[test]
    fn test_unknown_provider_kind_left_unbound() {
        let orchestrator = EvaluationOrchestrator::builder()
            .registry(ProviderRegistry::new())
            .build()
            .unwrap();
        assert!(orchestrator.available_providers().is_empty());
        assert!(orchestrator
            .unbound_reason("claude")
            .is_some_and(|r| r.starts_with("provider not configured")));
    }

    struct FailingStore(MemoryResultStore);

    #[async_trait]
    impl ResultStore for FailingStore {
        async fn create(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
            self.0.create(record).await
        }

        async fn complete(&self, _record: &EvaluationRecord) -> Result<(), StoreError> {
            Err(StoreError::Database("disk full".into()))
        }

        async fn get(&self, id: Uuid) -> Result<Option<EvaluationRecord>, StoreError> {
            self.0.get(id).await
        }

        async fn list(&self, limit: usize) -> Result<Vec<EvaluationRecord>, StoreError> {
            self.0.list(limit).await
        }

        async fn list_by_status(
            &self,
            status: EvaluationStatus,
            limit: usize,
        ) -> Result<Vec<EvaluationRecord>, StoreError> {
            self.0.list_by_status(status, limit).await
        }

        async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
            self.0.delete(id).await
        }

        async fn statistics(&self) -> Result<crate::store::StoreStatistics, StoreError> {
            self.0.statistics().await
        }
    }

    #[tokio::test]
    async fn test_persist_failure_returns_finished_record() {
        let (deepseek, claude, gpt) = mocks();
        let orchestrator = EvaluationOrchestrator::builder()
            .registry(ProviderRegistry::new())
            .provider("deepseek", deepseek)
            .provider("claude", claude)
            .provider("gpt", gpt)
            .store(Arc::new(FailingStore(MemoryResultStore::new())))
            .build()
            .unwrap();

        let err = orchestrator
            .run(request(), EvaluationOptions::default())
            .await
            .unwrap_err();

        match err {
            OrchestratorError::Persist { record, source } => {
                assert_eq!(record.status, EvaluationStatus::Completed);
                assert_eq!(record.overall_score(), Some(81));
                assert!(source.to_string().contains("disk full"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
