//! Rubric loading and validation.
//!
//! Rubrics are structured data validated against JSON Schema and then
//! checked for weight and indicator consistency. They are loaded once at
//! process start and shared read-only afterwards.

mod parser;
mod schema;

pub use parser::{DimensionSpec, Indicator, Rubric, RubricError, WEIGHT_SUM_TOLERANCE};
pub use schema::validate_rubric_schema;
