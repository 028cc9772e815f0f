//! Scoring aggregator: weighted composite with renormalization.
//!
//! Only successful dimensions contribute. Their configured weights are
//! rescaled to sum to 1.0, which keeps the relative priority the rubric
//! assigns even when some dimensions are missing:
//!
//! ```text
//! W          = Σ weight(d)            for succeeded d
//! weight'(d) = weight(d) / W
//! overall    = round(Σ weight'(d) × score(d))
//! ```
//!
//! `W == 0` means there is nothing to score and aggregation fails.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::rubric::DimensionSpec;
use crate::types::{CompositeScore, DimensionId, DimensionResult};

/// Errors from aggregation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("no dimension produced a usable score")]
    NoSuccessfulDimensions,
}

/// Computes composite scores from dimension results.
///
/// Pure and deterministic: the same results and specs always produce the
/// same composite.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScoringAggregator;

impl ScoringAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate dimension results against their specs.
    ///
    /// Failed results are ignored. Successful results for dimensions that
    /// have no rubric entry are ignored with a warning.
    pub fn aggregate(
        &self,
        results: &[DimensionResult],
        specs: &[DimensionSpec],
    ) -> Result<CompositeScore, AggregationError> {
        let mut scores = BTreeMap::new();
        let mut weights = BTreeMap::new();

        for result in results.iter().filter(|r| r.is_success()) {
            let Some(score) = result.score else {
                continue;
            };
            let Some(spec) = specs.iter().find(|s| s.id == result.dimension) else {
                tracing::warn!(
                    dimension = %result.dimension,
                    "Ignoring result for dimension missing from rubric"
                );
                continue;
            };
            scores.insert(result.dimension.clone(), score);
            weights.insert(result.dimension.clone(), spec.weight);
        }

        self.combine(scores, &weights)
    }

    /// Combine raw scores with configured weights.
    ///
    /// Dimensions without a weight are dropped. Used directly by the
    /// consensus fallback, where scores come from reviewers rather than
    /// dimension results.
    pub fn combine(
        &self,
        scores: BTreeMap<DimensionId, f64>,
        weights: &BTreeMap<DimensionId, f64>,
    ) -> Result<CompositeScore, AggregationError> {
        let dimension_scores: BTreeMap<DimensionId, f64> = scores
            .into_iter()
            .filter(|(id, _)| weights.contains_key(id))
            .collect();

        let total: f64 = dimension_scores.keys().map(|id| weights[id]).sum();
        if total <= 0.0 || !total.is_finite() {
            return Err(AggregationError::NoSuccessfulDimensions);
        }

        let active_weights: BTreeMap<DimensionId, f64> = dimension_scores
            .keys()
            .map(|id| (id.clone(), weights[id] / total))
            .collect();

        let weighted: f64 = dimension_scores
            .iter()
            .map(|(id, score)| active_weights[id] * score)
            .sum();

        Ok(CompositeScore {
            dimension_scores,
            overall: weighted.round().clamp(0.0, 100.0) as u8,
            active_weights,
        })
    }
}
