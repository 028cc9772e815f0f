//! Persistence for evaluation records.
//!
//! A record is written twice in its life: once as `pending` when the
//! orchestrator starts, once when it reaches `completed` or `failed`. Stores
//! refuse any further completion of a terminal record.
//!
//! Reads rewrite legacy dimension keys through the rubric alias table, so
//! records written under older rubric versions come back with canonical ids.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use lessoneval_core::{EvaluationRecord, EvaluationStatus};

mod memory;
mod sqlite;

pub use memory::MemoryResultStore;
pub use sqlite::SqliteResultStore;

/// Errors from result stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Evaluation not found: {0}")]
    NotFound(Uuid),

    #[error("Evaluation already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("Evaluation {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: EvaluationStatus },

    #[error("Evaluation {0} cannot be completed with status pending")]
    NotTerminal(Uuid),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// Aggregate counts over stored evaluations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    /// Mean overall score across completed evaluations
    pub average_overall: Option<f64>,
}

impl StoreStatistics {
    /// Compute statistics from records in memory.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a EvaluationRecord>) -> Self {
        let mut stats = Self::default();
        let mut score_sum = 0.0;
        let mut scored = 0usize;
        for record in records {
            stats.total += 1;
            match record.status {
                EvaluationStatus::Completed => stats.completed += 1,
                EvaluationStatus::Failed => stats.failed += 1,
                EvaluationStatus::Pending => stats.pending += 1,
            }
            if let Some(overall) = record.overall_score() {
                score_sum += f64::from(overall);
                scored += 1;
            }
        }
        stats.average_overall = (scored > 0).then(|| score_sum / scored as f64);
        stats
    }
}

/// Storage for evaluation records.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert a new `pending` record.
    async fn create(&self, record: &EvaluationRecord) -> Result<(), StoreError>;

    /// Replace a pending record with its terminal version.
    async fn complete(&self, record: &EvaluationRecord) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<EvaluationRecord>, StoreError>;

    /// Most recent records first.
    async fn list(&self, limit: usize) -> Result<Vec<EvaluationRecord>, StoreError>;

    async fn list_by_status(
        &self,
        status: EvaluationStatus,
        limit: usize,
    ) -> Result<Vec<EvaluationRecord>, StoreError>;

    /// Returns false when no record had this id.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn statistics(&self) -> Result<StoreStatistics, StoreError>;
}

/// Check that `record` may replace a stored record with `current` status.
pub(crate) fn check_completion(
    current: EvaluationStatus,
    record: &EvaluationRecord,
) -> Result<(), StoreError> {
    if current.is_terminal() {
        return Err(StoreError::AlreadyTerminal {
            id: record.id,
            status: current,
        });
    }
    if !record.status.is_terminal() {
        return Err(StoreError::NotTerminal(record.id));
    }
    Ok(())
}
