//! Consensus report model for debate-mode evaluations.
//!
//! The runtime performs the cross-review and moderator calls; this module
//! owns the data shapes, the parsing of reviewer and moderator replies, and
//! the deterministic fallback used when the moderator cannot be trusted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::aggregator::ScoringAggregator;
use crate::response::{number_value, parse_json_object, string_list, ResponseParseError};
use crate::rubric::DimensionSpec;
use crate::types::{DimensionId, DimensionResult};

/// Moderator confidence in the consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(ConfidenceLevel::High),
            "MEDIUM" => Some(ConfidenceLevel::Medium),
            "LOW" => Some(ConfidenceLevel::Low),
            _ => None,
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfidenceLevel::High => "HIGH",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::Low => "LOW",
        };
        f.write_str(s)
    }
}

/// One dimension provider's review of every initial evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReview {
    pub dimension: DimensionId,
    pub provider: String,
    #[serde(default)]
    pub agreements: Vec<String>,
    #[serde(default)]
    pub disagreements: Vec<String>,
    #[serde(default)]
    pub new_insights: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_change_reason: Option<String>,
    /// Set when the reviewer call or its parsing failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrossReview {
    /// Parse a reviewer reply. Adjusted scores outside 0-100 are discarded.
    pub fn parse(
        dimension: DimensionId,
        provider: impl Into<String>,
        text: &str,
    ) -> Result<Self, ResponseParseError> {
        let map = parse_json_object(text)?;
        let list = |key: &str| map.get(key).and_then(string_list).unwrap_or_default();
        let score = |key: &str| {
            map.get(key)
                .and_then(number_value)
                .filter(|s| s.is_finite() && (0.0..=100.0).contains(s))
        };

        Ok(Self {
            dimension,
            provider: provider.into(),
            agreements: list("agreements"),
            disagreements: list("disagreements"),
            new_insights: list("new_insights"),
            original_score: score("original_score"),
            adjusted_score: score("adjusted_score"),
            score_change_reason: map
                .get("score_change_reason")
                .and_then(Value::as_str)
                .map(String::from),
            error: None,
        })
    }

    /// A review slot for a reviewer that failed.
    pub fn failed(dimension: DimensionId, provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            dimension,
            provider: provider.into(),
            agreements: Vec::new(),
            disagreements: Vec::new(),
            new_insights: Vec::new(),
            original_score: None,
            adjusted_score: None,
            score_change_reason: None,
            error: Some(error.into()),
        }
    }
}

/// The moderator's synthesis, as parsed from its reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeratorVerdict {
    pub consensus_scores: BTreeMap<DimensionId, f64>,
    pub overall: Option<u8>,
    pub agreements: Vec<String>,
    pub priority_recommendations: Vec<String>,
    pub confidence: ConfidenceLevel,
    pub confidence_reason: String,
}

impl ModeratorVerdict {
    /// Parse a moderator reply.
    ///
    /// Requires at least one in-range consensus score; anything less is a
    /// [`ResponseParseError::MissingScore`] so the caller falls back.
    pub fn parse(text: &str) -> Result<Self, ResponseParseError> {
        let map = parse_json_object(text)?;
        let scores = map
            .get("consensus_scores")
            .and_then(Value::as_object)
            .ok_or(ResponseParseError::MissingScore)?;

        let mut consensus_scores = BTreeMap::new();
        let mut overall = None;
        for (key, value) in scores {
            let Some(score) = number_value(value) else {
                continue;
            };
            if !score.is_finite() || !(0.0..=100.0).contains(&score) {
                return Err(ResponseParseError::ScoreOutOfRange(score));
            }
            if key == "overall" {
                overall = Some(score.round() as u8);
            } else {
                consensus_scores.insert(DimensionId::new(key.clone()), score);
            }
        }
        if consensus_scores.is_empty() {
            return Err(ResponseParseError::MissingScore);
        }

        Ok(Self {
            consensus_scores,
            overall,
            agreements: map.get("agreements").and_then(string_list).unwrap_or_default(),
            priority_recommendations: map
                .get("priority_recommendations")
                .and_then(string_list)
                .unwrap_or_default(),
            confidence: map
                .get("confidence_level")
                .and_then(Value::as_str)
                .and_then(ConfidenceLevel::parse)
                .unwrap_or(ConfidenceLevel::Medium),
            confidence_reason: map
                .get("confidence_reason")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// Outcome of a debate-mode consensus pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusReport {
    /// Round one: cross-reviews, one per successful dimension
    pub reviews: Vec<CrossReview>,

    pub consensus_scores: BTreeMap<DimensionId, f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall: Option<u8>,

    #[serde(default)]
    pub agreements: Vec<String>,

    #[serde(default)]
    pub priority_recommendations: Vec<String>,

    pub confidence: ConfidenceLevel,

    #[serde(default)]
    pub confidence_reason: String,

    /// True when scores were derived locally instead of by the moderator
    #[serde(default)]
    pub fallback: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderator_error: Option<String>,
}

impl ConsensusReport {
    /// Build a report from a moderator verdict.
    ///
    /// A missing overall is computed from the consensus scores with
    /// renormalized rubric weights.
    pub fn from_verdict(
        reviews: Vec<CrossReview>,
        verdict: ModeratorVerdict,
        specs: &[DimensionSpec],
    ) -> Self {
        let overall = verdict
            .overall
            .or_else(|| weighted_overall(&verdict.consensus_scores, specs));
        Self {
            reviews,
            consensus_scores: verdict.consensus_scores,
            overall,
            agreements: verdict.agreements,
            priority_recommendations: verdict.priority_recommendations,
            confidence: verdict.confidence,
            confidence_reason: verdict.confidence_reason,
            fallback: false,
            moderator_error: None,
        }
    }

    /// Deterministic consensus used when the moderator fails.
    ///
    /// Each dimension takes its reviewer's adjusted score when one exists,
    /// otherwise its original score; overall uses renormalized weights.
    pub fn fallback(
        results: &[DimensionResult],
        reviews: Vec<CrossReview>,
        specs: &[DimensionSpec],
        moderator_error: impl Into<String>,
    ) -> Self {
        let mut scores = BTreeMap::new();
        for review in &reviews {
            if let Some(adjusted) = review.adjusted_score {
                scores.insert(review.dimension.clone(), adjusted);
            }
        }
        for result in results.iter().filter(|r| r.is_success()) {
            if let Some(score) = result.score {
                scores.entry(result.dimension.clone()).or_insert(score);
            }
        }

        let overall = weighted_overall(&scores, specs);
        Self {
            reviews,
            consensus_scores: scores,
            overall,
            agreements: Vec::new(),
            priority_recommendations: Vec::new(),
            confidence: ConfidenceLevel::Low,
            confidence_reason: "Moderator failed, using reviewed scores with renormalized weights"
                .to_string(),
            fallback: true,
            moderator_error: Some(moderator_error.into()),
        }
    }
}

fn weighted_overall(scores: &BTreeMap<DimensionId, f64>, specs: &[DimensionSpec]) -> Option<u8> {
    let weights: BTreeMap<DimensionId, f64> =
        specs.iter().map(|s| (s.id.clone(), s.weight)).collect();
    ScoringAggregator::new()
        .combine(scores.clone(), &weights)
        .ok()
        .map(|c| c.overall)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ParsedEvaluation;
    use crate::rubric::Rubric;
    use std::time::Duration;

    fn ok(id: &str, score: f64) -> DimensionResult {
        DimensionResult::succeeded(
            DimensionId::new(id),
            "mock",
            ParsedEvaluation {
                score,
                ..Default::default()
            },
            Duration::ZERO,
            1,
        )
    }

    #[test]
    fn test_parse_cross_review() {
        let text = r#"```json
{
  "agreements": ["Claude is right about te reo"],
  "disagreements": [],
  "new_insights": ["Assessment ignores whānau"],
  "original_score": 85,
  "adjusted_score": 80,
  "score_change_reason": "Missed assessment gaps"
}
```"#;
        let review = CrossReview::parse(DimensionId::new("place_based_learning"), "deepseek", text).unwrap();
        assert_eq!(review.adjusted_score, Some(80.0));
        assert_eq!(review.original_score, Some(85.0));
        assert_eq!(review.new_insights.len(), 1);
        assert!(review.error.is_none());
    }

    #[test]
    fn test_cross_review_out_of_range_adjustment_dropped() {
        let review = CrossReview::parse(
            DimensionId::new("critical_pedagogy"),
            "gpt",
            r#"{"adjusted_score": 900}"#,
        )
        .unwrap();
        assert_eq!(review.adjusted_score, None);
    }

    #[test]
    fn test_parse_moderator_verdict() {
        let text = r#"{
            "consensus_scores": {
                "place_based_learning": 80,
                "cultural_responsiveness_integrated": 75,
                "overall": 77
            },
            "agreements": ["Strong local grounding"],
            "priority_recommendations": [
                {"priority": "HIGH", "recommendation": "Partner with the local marae for the opening"}
            ],
            "confidence_level": "high",
            "confidence_reason": "Agents converged"
        }"#;
        let verdict = ModeratorVerdict::parse(text).unwrap();
        assert_eq!(verdict.consensus_scores.len(), 2);
        assert_eq!(verdict.overall, Some(77));
        assert_eq!(verdict.confidence, ConfidenceLevel::High);
        assert_eq!(verdict.priority_recommendations.len(), 1);
    }

    #[test]
    fn test_moderator_without_scores_rejected() {
        assert_eq!(
            ModeratorVerdict::parse(r#"{"agreements": []}"#),
            Err(ResponseParseError::MissingScore)
        );
        assert!(ModeratorVerdict::parse("I could not decide.").is_err());
    }

    #[test]
    fn test_report_from_verdict_computes_missing_overall() {
        let specs = Rubric::builtin().dimensions;
        let verdict = ModeratorVerdict::parse(
            r#"{"consensus_scores": {"place_based_learning": 80, "cultural_responsiveness_integrated": 60}}"#,
        )
        .unwrap();
        let report = ConsensusReport::from_verdict(Vec::new(), verdict, &specs);
        assert_eq!(report.overall, Some(68));
        assert!(!report.fallback);
    }

    #[test]
    fn test_fallback_prefers_adjusted_scores() {
        let specs = Rubric::builtin().dimensions;
        let results = vec![ok("place_based_learning", 85.0), ok("critical_pedagogy", 82.0)];
        let mut review =
            CrossReview::failed(DimensionId::new("place_based_learning"), "deepseek", "unused");
        review.error = None;
        review.adjusted_score = Some(75.0);

        let report = ConsensusReport::fallback(&results, vec![review], &specs, "moderator timed out");

        assert!(report.fallback);
        assert_eq!(report.confidence, ConfidenceLevel::Low);
        assert_eq!(report.consensus_scores["place_based_learning"], 75.0);
        assert_eq!(report.consensus_scores["critical_pedagogy"], 82.0);
        // equal weights (0.25 each): (75 + 82) / 2 = 78.5 -> 79
        assert_eq!(report.overall, Some(79));
        assert_eq!(report.moderator_error.as_deref(), Some("moderator timed out"));
    }
}
