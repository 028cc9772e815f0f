//! # lessoneval-core
//!
//! Deterministic half of the lesson plan evaluator.
//!
//! This crate owns everything about an evaluation that does not touch the
//! network:
//! - The rubric: weighted dimensions, their providers and indicators
//! - Parsing provider replies into structured per-dimension results
//! - The weighted composite, renormalized over whichever dimensions succeeded
//! - The persisted evaluation record and its lifecycle
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same results and rubric always produce the same composite
//! 2. **No I/O**: Apart from reading rubric files, nothing here blocks or calls out
//! 3. **Renormalized**: Applied weights always sum to 1.0 when any dimension succeeded
//! 4. **Defensive parsing**: Bad provider output becomes an error value, never a panic
//!
//! ## Example
//!
//! ```rust,ignore
//! use lessoneval_core::{Rubric, ScoringAggregator};
//!
//! let rubric = Rubric::from_yaml_file("rubric.yaml")?;
//! let composite = ScoringAggregator::new().aggregate(&results, &rubric.dimensions)?;
//! println!("overall {}", composite.overall);
//! ```

pub mod aggregator;
pub mod consensus;
pub mod lesson;
pub mod recommendations;
pub mod response;
pub mod rubric;
pub mod types;

// Re-export main types at crate root
pub use aggregator::{AggregationError, ScoringAggregator};
pub use consensus::{ConfidenceLevel, ConsensusReport, CrossReview, ModeratorVerdict};
pub use lesson::{inspect as inspect_lesson, LessonDiagnostics};
pub use recommendations::{merge_recommendations, DEFAULT_MAX_RECOMMENDATIONS};
pub use response::{parse_dimension_response, ParsedEvaluation, ResponseParseError};
pub use rubric::{DimensionSpec, Indicator, Rubric, RubricError};
pub use types::{
    CompositeScore, DimensionId, DimensionResult, DimensionStatus, EvaluationMode,
    EvaluationRecord, EvaluationRequest, EvaluationStatus, RequestError, TokenUsage,
    UnavailableDimension, UnavailableReason,
};
