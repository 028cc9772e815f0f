//! Dimension agents.
//!
//! One agent per enabled rubric dimension. An agent renders its prompt,
//! calls its provider under the retry policy and turns whatever comes back
//! into a [`DimensionResult`](lessoneval_core::DimensionResult).

mod rubric_agent;
mod traits;

pub use rubric_agent::RubricAgent;
pub use traits::{AgentState, DimensionAgent};
