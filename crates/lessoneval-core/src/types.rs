//! Data model shared by the core and runtime crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::consensus::ConsensusReport;

/// Canonical identifier of a rubric dimension (e.g. `place_based_learning`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionId(String);

impl DimensionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DimensionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DimensionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for DimensionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Errors raised when a request cannot be dispatched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error("lesson content is empty")]
    EmptyContent,
}

/// A lesson plan submitted for evaluation.
///
/// Immutable once dispatched; every dimension agent receives a shared
/// reference to the same request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Lesson title
    pub title: String,

    /// Full lesson plan text
    pub content: String,

    /// Grade or year level (free text)
    #[serde(default)]
    pub grade_level: String,

    /// Subject area (free text)
    #[serde(default)]
    pub subject_area: String,
}

impl EvaluationRequest {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            grade_level: String::new(),
            subject_area: String::new(),
        }
    }

    pub fn with_grade_level(mut self, grade_level: impl Into<String>) -> Self {
        self.grade_level = grade_level.into();
        self
    }

    pub fn with_subject_area(mut self, subject_area: impl Into<String>) -> Self {
        self.subject_area = subject_area.into();
        self
    }

    /// Reject requests that cannot produce a meaningful evaluation.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.content.trim().is_empty() {
            return Err(RequestError::EmptyContent);
        }
        Ok(())
    }
}

/// Terminal state of one dimension agent invocation.
///
/// Every state except `Succeeded` is treated by the orchestrator as
/// "dimension unavailable", but each is reported distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionStatus {
    /// Provider answered with a parseable, in-range evaluation
    Succeeded,
    /// Transient failures used up the attempt budget
    RetriesExhausted,
    /// Provider returned a non-retryable error
    ProviderRejected,
    /// Response could not be mapped to the expected shape
    ParseFailed,
    /// Overall evaluation deadline passed before the agent resolved
    TimedOut,
    /// The agent task itself failed (panic or cancellation)
    Internal,
}

impl DimensionStatus {
    pub fn is_success(self) -> bool {
        matches!(self, DimensionStatus::Succeeded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DimensionStatus::Succeeded => "succeeded",
            DimensionStatus::RetriesExhausted => "retries_exhausted",
            DimensionStatus::ProviderRejected => "provider_rejected",
            DimensionStatus::ParseFailed => "parse_failed",
            DimensionStatus::TimedOut => "timed_out",
            DimensionStatus::Internal => "internal",
        }
    }

    /// Why a dimension with this status is missing from the composite.
    pub fn unavailable_reason(self) -> Option<UnavailableReason> {
        match self {
            DimensionStatus::Succeeded => None,
            DimensionStatus::RetriesExhausted => Some(UnavailableReason::RetriesExhausted),
            DimensionStatus::ProviderRejected => Some(UnavailableReason::ProviderRejected),
            DimensionStatus::ParseFailed => Some(UnavailableReason::ParseFailed),
            DimensionStatus::TimedOut => Some(UnavailableReason::Timeout),
            DimensionStatus::Internal => Some(UnavailableReason::Internal),
        }
    }
}

impl fmt::Display for DimensionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,

    /// Tokens in the completion
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Total tokens used.
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// Outcome of evaluating one dimension.
///
/// Created once per evaluation per dimension and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionResult {
    pub dimension: DimensionId,

    /// Provider id that produced (or failed to produce) the result
    pub provider: String,

    pub status: DimensionStatus,

    /// Raw score 0-100, present only on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,

    /// Named lists such as strengths, gaps, areas_for_improvement
    #[serde(default)]
    pub breakdown: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub recommendations: Vec<String>,

    /// Per-indicator scores on the 1-5 scale, when the provider supplied them
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub indicator_scores: BTreeMap<String, f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Raw provider text kept when parsing failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,

    pub elapsed_ms: u64,

    pub attempts: u32,

    #[serde(default)]
    pub usage: TokenUsage,
}

impl DimensionResult {
    /// A successful result built from a parsed provider response.
    pub fn succeeded(
        dimension: DimensionId,
        provider: impl Into<String>,
        parsed: crate::response::ParsedEvaluation,
        elapsed: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            dimension,
            provider: provider.into(),
            status: DimensionStatus::Succeeded,
            score: Some(parsed.score),
            breakdown: parsed.breakdown,
            recommendations: parsed.recommendations,
            indicator_scores: parsed.indicator_scores,
            summary: parsed.summary,
            error: None,
            raw_response: None,
            elapsed_ms: elapsed.as_millis() as u64,
            attempts,
            usage: TokenUsage::default(),
        }
    }

    /// A failed result. `status` must not be `Succeeded`.
    pub fn failed(
        dimension: DimensionId,
        provider: impl Into<String>,
        status: DimensionStatus,
        error: impl Into<String>,
        elapsed: Duration,
        attempts: u32,
    ) -> Self {
        debug_assert!(!status.is_success());
        Self {
            dimension,
            provider: provider.into(),
            status,
            score: None,
            breakdown: BTreeMap::new(),
            recommendations: Vec::new(),
            indicator_scores: BTreeMap::new(),
            summary: None,
            error: Some(error.into()),
            raw_response: None,
            elapsed_ms: elapsed.as_millis() as u64,
            attempts,
            usage: TokenUsage::default(),
        }
    }

    pub fn with_raw_response(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = Some(raw.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success() && self.score.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }
}

/// Why a dimension did not contribute to the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Administratively disabled or provider not configured
    Disabled,
    /// Overall deadline elapsed while the dimension was in flight
    Timeout,
    RetriesExhausted,
    ProviderRejected,
    ParseFailed,
    Internal,
}

impl UnavailableReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnavailableReason::Disabled => "disabled",
            UnavailableReason::Timeout => "timeout",
            UnavailableReason::RetriesExhausted => "retries_exhausted",
            UnavailableReason::ProviderRejected => "provider_rejected",
            UnavailableReason::ParseFailed => "parse_failed",
            UnavailableReason::Internal => "internal",
        }
    }
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dimension missing from the composite, with the reason surfaced to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailableDimension {
    pub dimension: DimensionId,
    pub reason: UnavailableReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl UnavailableDimension {
    pub fn new(dimension: DimensionId, reason: UnavailableReason) -> Self {
        Self {
            dimension,
            reason,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Weighted composite derived from the successful dimension results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    /// Raw score per contributing dimension
    pub dimension_scores: BTreeMap<DimensionId, f64>,

    /// Weighted composite, rounded to the nearest integer
    pub overall: u8,

    /// Renormalized weight actually applied to each dimension
    pub active_weights: BTreeMap<DimensionId, f64>,
}

impl CompositeScore {
    /// Sum of the applied weights (1.0 within tolerance when non-empty).
    pub fn weight_sum(&self) -> f64 {
        self.active_weights.values().sum()
    }
}

/// Lifecycle status of a persisted evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStatus {
    Pending,
    Completed,
    Failed,
}

impl EvaluationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationStatus::Pending => "pending",
            EvaluationStatus::Completed => "completed",
            EvaluationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, EvaluationStatus::Pending)
    }
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(EvaluationStatus::Pending),
            "completed" => Ok(EvaluationStatus::Completed),
            "failed" => Ok(EvaluationStatus::Failed),
            other => Err(format!("unknown evaluation status: {}", other)),
        }
    }
}

/// Orchestration variant requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Independent per-dimension evaluation only
    #[default]
    Standard,
    /// Adds a cross-review and moderator consensus pass
    Debate,
}

impl EvaluationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationMode::Standard => "standard",
            EvaluationMode::Debate => "debate",
        }
    }
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(EvaluationMode::Standard),
            "debate" => Ok(EvaluationMode::Debate),
            other => Err(format!("unknown evaluation mode: {}", other)),
        }
    }
}

/// The persisted aggregate of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: Uuid,

    pub request: EvaluationRequest,

    #[serde(default)]
    pub mode: EvaluationMode,

    pub status: EvaluationStatus,

    /// One entry per launched dimension, in rubric order
    #[serde(default)]
    pub results: Vec<DimensionResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<CompositeScore>,

    /// Dimensions excluded from scoring and why
    #[serde(default)]
    pub unavailable: Vec<UnavailableDimension>,

    /// Merged, de-duplicated recommendations across dimensions
    #[serde(default)]
    pub recommendations: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusReport>,

    /// User-visible failure text when status is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl EvaluationRecord {
    /// A fresh `pending` record for a request about to be dispatched.
    pub fn pending(request: EvaluationRequest, mode: EvaluationMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            mode,
            status: EvaluationStatus::Pending,
            results: Vec::new(),
            composite: None,
            unavailable: Vec::new(),
            recommendations: Vec::new(),
            consensus: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Mark the record completed with its composite score.
    pub fn complete(&mut self, composite: CompositeScore) {
        self.status = EvaluationStatus::Completed;
        self.composite = Some(composite);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the record failed. Any composite is discarded.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = EvaluationStatus::Failed;
        self.composite = None;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Completed, but with at least one dimension missing.
    pub fn is_degraded(&self) -> bool {
        self.status == EvaluationStatus::Completed && !self.unavailable.is_empty()
    }

    pub fn overall_score(&self) -> Option<u8> {
        self.composite.as_ref().map(|c| c.overall)
    }

    pub fn result_for(&self, dimension: &str) -> Option<&DimensionResult> {
        self.results.iter().find(|r| r.dimension.as_str() == dimension)
    }

    /// Token usage summed over every dimension call.
    pub fn total_usage(&self) -> TokenUsage {
        let mut usage = TokenUsage::default();
        for result in &self.results {
            usage.add(&result.usage);
        }
        usage
    }

    /// Rewrite legacy dimension keys to their canonical names.
    ///
    /// Used only when reading historical records; evaluations in flight
    /// always carry canonical ids.
    pub fn canonicalize(&mut self, aliases: &BTreeMap<String, String>) {
        if aliases.is_empty() {
            return;
        }
        let resolve = |id: &mut DimensionId| {
            if let Some(canonical) = aliases.get(id.as_str()) {
                *id = DimensionId::new(canonical.clone());
            }
        };

        for result in &mut self.results {
            resolve(&mut result.dimension);
        }
        for missing in &mut self.unavailable {
            resolve(&mut missing.dimension);
        }
        if let Some(composite) = &mut self.composite {
            composite.dimension_scores = rekey(&composite.dimension_scores, aliases);
            composite.active_weights = rekey(&composite.active_weights, aliases);
        }
        if let Some(consensus) = &mut self.consensus {
            consensus.consensus_scores = rekey(&consensus.consensus_scores, aliases);
            for review in &mut consensus.reviews {
                resolve(&mut review.dimension);
            }
        }
    }
}

fn rekey(
    map: &BTreeMap<DimensionId, f64>,
    aliases: &BTreeMap<String, String>,
) -> BTreeMap<DimensionId, f64> {
    map.iter()
        .map(|(id, value)| {
            let key = aliases
                .get(id.as_str())
                .map(|c| DimensionId::new(c.clone()))
                .unwrap_or_else(|| id.clone());
            (key, *value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_validation() {
        let request = EvaluationRequest::new("Rivers", "   ");
        assert_eq!(request.validate(), Err(RequestError::EmptyContent));

        let request = EvaluationRequest::new("Rivers", "Walk to the awa and observe.")
            .with_grade_level("Year 7")
            .with_subject_area("Science");
        assert!(request.validate().is_ok());
        assert_eq!(request.grade_level, "Year 7");
    }

    #[test]
    fn test_status_reasons() {
        assert_eq!(DimensionStatus::Succeeded.unavailable_reason(), None);
        assert_eq!(
            DimensionStatus::TimedOut.unavailable_reason(),
            Some(UnavailableReason::Timeout)
        );
        assert_eq!(UnavailableReason::Timeout.to_string(), "timeout");
        assert_eq!(UnavailableReason::Disabled.as_str(), "disabled");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&DimensionStatus::RetriesExhausted).unwrap();
        assert_eq!(json, "\"retries_exhausted\"");
        let json = serde_json::to_string(&EvaluationStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
        assert_eq!("FAILED".parse::<EvaluationStatus>(), Ok(EvaluationStatus::Failed));
        assert!("done".parse::<EvaluationStatus>().is_err());
    }

    #[test]
    fn test_record_lifecycle() {
        let mut record = EvaluationRecord::pending(
            EvaluationRequest::new("Title", "Body"),
            EvaluationMode::Standard,
        );
        assert_eq!(record.status, EvaluationStatus::Pending);
        assert!(record.completed_at.is_none());

        record.fail("no dimension succeeded");
        assert_eq!(record.status, EvaluationStatus::Failed);
        assert!(record.composite.is_none());
        assert!(record.completed_at.is_some());
        assert!(!record.is_degraded());
    }

    #[test]
    fn test_canonicalize_legacy_keys() {
        let mut record = EvaluationRecord::pending(
            EvaluationRequest::new("Title", "Body"),
            EvaluationMode::Standard,
        );
        record.results.push(DimensionResult::failed(
            DimensionId::new("cultural_responsiveness"),
            "claude",
            DimensionStatus::ParseFailed,
            "bad json",
            Duration::from_millis(10),
            1,
        ));
        record.unavailable.push(UnavailableDimension::new(
            DimensionId::new("cultural_responsiveness"),
            UnavailableReason::ParseFailed,
        ));
        record.complete(CompositeScore {
            dimension_scores: BTreeMap::from([(DimensionId::new("cultural_responsiveness"), 70.0)]),
            overall: 70,
            active_weights: BTreeMap::from([(DimensionId::new("cultural_responsiveness"), 1.0)]),
        });

        let aliases = BTreeMap::from([(
            "cultural_responsiveness".to_string(),
            "cultural_responsiveness_integrated".to_string(),
        )]);
        record.canonicalize(&aliases);

        assert!(record.result_for("cultural_responsiveness_integrated").is_some());
        assert_eq!(
            record.unavailable[0].dimension.as_str(),
            "cultural_responsiveness_integrated"
        );
        let composite = record.composite.unwrap();
        assert!(composite
            .dimension_scores
            .contains_key("cultural_responsiveness_integrated"));
        assert!(!composite.active_weights.contains_key("cultural_responsiveness"));
    }

    #[test]
    fn test_total_usage() {
        let mut record = EvaluationRecord::pending(
            EvaluationRequest::new("Title", "Body"),
            EvaluationMode::Standard,
        );
        for tokens in [100, 250] {
            record.results.push(
                DimensionResult::failed(
                    DimensionId::new("x"),
                    "gpt",
                    DimensionStatus::ParseFailed,
                    "e",
                    Duration::ZERO,
                    1,
                )
                .with_usage(TokenUsage {
                    prompt_tokens: tokens,
                    completion_tokens: 10,
                }),
            );
        }
        assert_eq!(record.total_usage().total(), 370);
    }
}
