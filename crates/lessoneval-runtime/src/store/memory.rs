//! In-process result store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use uuid::Uuid;

use lessoneval_core::{EvaluationRecord, EvaluationStatus};

use super::{check_completion, ResultStore, StoreError, StoreStatistics};

/// Result store backed by a map. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    records: RwLock<BTreeMap<Uuid, EvaluationRecord>>,
    aliases: BTreeMap<String, String>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonicalize legacy dimension keys on read.
    pub fn with_aliases(mut self, aliases: BTreeMap<String, String>) -> Self {
        self.aliases = aliases;
        self
    }

    fn read_out(&self, record: &EvaluationRecord) -> EvaluationRecord {
        let mut record = record.clone();
        record.canonicalize(&self.aliases);
        record
    }

    fn newest_first<'a>(
        &self,
        records: impl Iterator<Item = &'a EvaluationRecord>,
        limit: usize,
    ) -> Vec<EvaluationRecord> {
        let mut matched: Vec<&EvaluationRecord> = records.collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matched
            .into_iter()
            .take(limit)
            .map(|r| self.read_out(r))
            .collect()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn create(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn complete(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let current = records
            .get(&record.id)
            .ok_or(StoreError::NotFound(record.id))?;
        check_completion(current.status, record)?;
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<EvaluationRecord>, StoreError> {
        Ok(self.records.read().get(&id).map(|r| self.read_out(r)))
    }

    async fn list(&self, limit: usize) -> Result<Vec<EvaluationRecord>, StoreError> {
        let records = self.records.read();
        Ok(self.newest_first(records.values(), limit))
    }

    async fn list_by_status(
        &self,
        status: EvaluationStatus,
        limit: usize,
    ) -> Result<Vec<EvaluationRecord>, StoreError> {
        let records = self.records.read();
        Ok(self.newest_first(records.values().filter(|r| r.status == status), limit))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.records.write().remove(&id).is_some())
    }

    async fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        Ok(StoreStatistics::from_records(self.records.read().values()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{completed_record, legacy_record};
    use lessoneval_core::{EvaluationMode, EvaluationRequest, Rubric};

    #[tokio::test]
    async fn test_create_complete_roundtrip() {
        let store = MemoryResultStore::new();
        let finished = completed_record();
        let mut pending = finished.clone();
        pending.status = EvaluationStatus::Pending;
        pending.composite = None;

        store.create(&pending).await.unwrap();
        assert_eq!(
            store.get(pending.id).await.unwrap().unwrap().status,
            EvaluationStatus::Pending
        );

        store.complete(&finished).await.unwrap();
        let back = store.get(finished.id).await.unwrap().unwrap();
        assert_eq!(back, finished);
        assert_eq!(back.overall_score(), Some(68));
        assert_eq!(back.unavailable, finished.unavailable);
    }

    #[tokio::test]
    async fn test_complete_exactly_once() {
        let store = MemoryResultStore::new();
        let record = completed_record();

        assert!(matches!(
            store.complete(&record).await,
            Err(StoreError::NotFound(_))
        ));

        let mut pending = record.clone();
        pending.status = EvaluationStatus::Pending;
        store.create(&pending).await.unwrap();
        assert!(matches!(
            store.create(&pending).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.complete(&pending).await,
            Err(StoreError::NotTerminal(_))
        ));

        store.complete(&record).await.unwrap();
        assert!(matches!(
            store.complete(&record).await,
            Err(StoreError::AlreadyTerminal { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_newest_first_and_filter() {
        let store = MemoryResultStore::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut record = EvaluationRecord::pending(
                EvaluationRequest::new(format!("Lesson {}", i), "text"),
                EvaluationMode::Standard,
            );
            record.created_at += chrono::Duration::seconds(i);
            ids.push(record.id);
            store.create(&record).await.unwrap();
        }
        let mut failed = store.get(ids[0]).await.unwrap().unwrap();
        failed.fail("All evaluators failed");
        store.complete(&failed).await.unwrap();

        let listed: Vec<Uuid> = store.list(10).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);
        assert_eq!(store.list(2).await.unwrap().len(), 2);

        let failed = store.list_by_status(EvaluationStatus::Failed, 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.as_deref(), Some("All evaluators failed"));

        let stats = store.statistics().await.unwrap();
        assert_eq!((stats.total, stats.pending, stats.failed), (3, 2, 1));
        assert_eq!(stats.average_overall, None);

        assert!(store.delete(ids[1]).await.unwrap());
        assert!(!store.delete(ids[1]).await.unwrap());
        assert_eq!(store.statistics().await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn test_legacy_keys_canonicalized_on_read() {
        let store = MemoryResultStore::new().with_aliases(Rubric::builtin().aliases);
        let record = legacy_record();
        store.create(&record).await.unwrap();

        let back = store.get(record.id).await.unwrap().unwrap();
        assert!(back.result_for("cultural_responsiveness_integrated").is_some());
        assert!(back.result_for("cultural_responsiveness").is_none());
        let composite = back.composite.unwrap();
        assert!(composite
            .active_weights
            .contains_key("cultural_responsiveness_integrated"));
    }
}
