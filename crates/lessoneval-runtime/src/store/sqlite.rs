//! SQLite result store.
//!
//! Listing columns are stored as scalars; the full record is stored as JSON
//! in `record`. All database work runs on the blocking pool.

use async_trait::async_trait;
use chrono::SecondsFormat;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use lessoneval_core::{EvaluationRecord, EvaluationStatus};

use super::{check_completion, ResultStore, StoreError, StoreStatistics};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS evaluations (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    grade_level TEXT NOT NULL,
    subject_area TEXT NOT NULL,
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    overall_score INTEGER,
    error TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_evaluations_created_at ON evaluations(created_at);
CREATE INDEX IF NOT EXISTS idx_evaluations_status ON evaluations(status);
"#;

fn db(context: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::Database(format!("{}: {}", context, e))
}

fn timestamp(value: &chrono::DateTime<chrono::Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Result store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteResultStore {
    conn: Arc<Mutex<Connection>>,
    aliases: Arc<BTreeMap<String, String>>,
}

impl SqliteResultStore {
    /// Open or create the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Database(format!(
                "failed to open database at {}: {}",
                path.display(),
                e
            ))
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db("failed to enable WAL mode"))?;
        Self::init(conn)
    }

    /// A private database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db("failed to open in-memory database"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(db("failed to create database schema"))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            aliases: Arc::new(BTreeMap::new()),
        })
    }

    /// Canonicalize legacy dimension keys on read.
    pub fn with_aliases(mut self, aliases: BTreeMap<String, String>) -> Self {
        self.aliases = Arc::new(aliases);
        self
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    fn decode(json: &str, aliases: &BTreeMap<String, String>) -> Result<EvaluationRecord, StoreError> {
        let mut record: EvaluationRecord = serde_json::from_str(json)?;
        record.canonicalize(aliases);
        Ok(record)
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
        aliases: &BTreeMap<String, String>,
    ) -> Result<Vec<EvaluationRecord>, StoreError> {
        let mut stmt = conn.prepare(sql).map_err(db("failed to prepare query"))?;
        let rows = stmt
            .query_map(params, |row| row.get::<_, String>(0))
            .map_err(db("failed to query evaluations"))?;

        let mut records = Vec::new();
        for json in rows {
            let json = json.map_err(db("failed to read evaluation row"))?;
            records.push(Self::decode(&json, aliases)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn create(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let record = record.clone();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO evaluations (id, title, grade_level, subject_area, mode, status, \
                 overall_score, error, created_at, completed_at, record) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id.to_string(),
                    record.request.title,
                    record.request.grade_level,
                    record.request.subject_area,
                    record.mode.as_str(),
                    record.status.as_str(),
                    record.overall_score(),
                    record.error,
                    timestamp(&record.created_at),
                    record.completed_at.as_ref().map(timestamp),
                    json,
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                    Err(StoreError::AlreadyExists(record.id))
                }
                Err(e) => Err(db("failed to insert evaluation")(e)),
            }
        })
        .await
    }

    async fn complete(&self, record: &EvaluationRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let record = record.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(db("failed to start transaction"))?;

            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM evaluations WHERE id = ?1",
                    params![record.id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db("failed to read evaluation status"))?;
            let current = current.ok_or(StoreError::NotFound(record.id))?;
            let current: EvaluationStatus = current.parse().map_err(StoreError::Database)?;
            check_completion(current, &record)?;

            tx.execute(
                "UPDATE evaluations SET status = ?2, overall_score = ?3, error = ?4, \
                 completed_at = ?5, record = ?6 WHERE id = ?1",
                params![
                    record.id.to_string(),
                    record.status.as_str(),
                    record.overall_score(),
                    record.error,
                    record.completed_at.as_ref().map(timestamp),
                    json,
                ],
            )
            .map_err(db("failed to update evaluation"))?;

            tx.commit().map_err(db("failed to commit transaction"))
        })
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<EvaluationRecord>, StoreError> {
        let aliases = Arc::clone(&self.aliases);
        self.with_conn(move |conn| {
            let json: Option<String> = conn
                .query_row(
                    "SELECT record FROM evaluations WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db("failed to read evaluation"))?;
            json.map(|j| Self::decode(&j, &aliases)).transpose()
        })
        .await
    }

    async fn list(&self, limit: usize) -> Result<Vec<EvaluationRecord>, StoreError> {
        let aliases = Arc::clone(&self.aliases);
        self.with_conn(move |conn| {
            Self::query_records(
                conn,
                "SELECT record FROM evaluations ORDER BY created_at DESC, id DESC LIMIT ?1",
                params![limit as i64],
                &aliases,
            )
        })
        .await
    }

    async fn list_by_status(
        &self,
        status: EvaluationStatus,
        limit: usize,
    ) -> Result<Vec<EvaluationRecord>, StoreError> {
        let aliases = Arc::clone(&self.aliases);
        self.with_conn(move |conn| {
            Self::query_records(
                conn,
                "SELECT record FROM evaluations WHERE status = ?1 \
                 ORDER BY created_at DESC, id DESC LIMIT ?2",
                params![status.as_str(), limit as i64],
                &aliases,
            )
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        self.with_conn(move |conn| {
            let deleted = conn
                .execute("DELETE FROM evaluations WHERE id = ?1", params![id.to_string()])
                .map_err(db("failed to delete evaluation"))?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*), \
                 COALESCE(SUM(status = 'completed'), 0), \
                 COALESCE(SUM(status = 'failed'), 0), \
                 COALESCE(SUM(status = 'pending'), 0), \
                 AVG(overall_score) \
                 FROM evaluations",
                [],
                |row| {
                    Ok(StoreStatistics {
                        total: row.get::<_, i64>(0)? as usize,
                        completed: row.get::<_, i64>(1)? as usize,
                        failed: row.get::<_, i64>(2)? as usize,
                        pending: row.get::<_, i64>(3)? as usize,
                        average_overall: row.get(4)?,
                    })
                },
            )
            .map_err(db("failed to compute statistics"))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{completed_record, legacy_record};
    use lessoneval_core::{DimensionResult, ParsedEvaluation, Rubric, ScoringAggregator};
    use proptest::prelude::*;
    use std::time::Duration;

    fn pending_of(record: &EvaluationRecord) -> EvaluationRecord {
        let mut pending = record.clone();
        pending.status = EvaluationStatus::Pending;
        pending.composite = None;
        pending.completed_at = None;
        pending
    }

    #[tokio::test]
    async fn test_roundtrip_reproduces_record() {
        let store = SqliteResultStore::open_in_memory().unwrap();
        let finished = completed_record();

        store.create(&pending_of(&finished)).await.unwrap();
        store.complete(&finished).await.unwrap();

        let back = store.get(finished.id).await.unwrap().unwrap();
        assert_eq!(back.results, finished.results);
        assert_eq!(back.composite, finished.composite);
        assert_eq!(back.unavailable, finished.unavailable);
        assert_eq!(back.status, EvaluationStatus::Completed);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    /// A completed record whose composite comes from the aggregator over
    /// arbitrary weights, so the stored weights are arbitrary quotients.
    fn aggregated_record(entries: &[(f64, f64)]) -> EvaluationRecord {
        let mut specs = Rubric::builtin().dimensions;
        specs.truncate(entries.len());
        let results: Vec<DimensionResult> = specs
            .iter_mut()
            .zip(entries)
            .map(|(spec, (weight, score))| {
                spec.weight = *weight;
                DimensionResult::succeeded(
                    spec.id.clone(),
                    "mock",
                    ParsedEvaluation {
                        score: *score,
                        ..Default::default()
                    },
                    Duration::from_millis(10),
                    1,
                )
            })
            .collect();

        let mut record = completed_record();
        record.unavailable.clear();
        record.complete(ScoringAggregator::new().aggregate(&results, &specs).unwrap());
        record.results = results;
        record
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_stored_composite_is_bit_identical(
            entries in proptest::collection::vec((0.001f64..1.0, 0.0f64..=100.0), 1..=4)
        ) {
            let finished = aggregated_record(&entries);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let back = runtime.block_on(async {
                let store = SqliteResultStore::open_in_memory().unwrap();
                store.create(&pending_of(&finished)).await.unwrap();
                store.complete(&finished).await.unwrap();
                store.get(finished.id).await.unwrap().unwrap()
            });

            prop_assert_eq!(&back.composite, &finished.composite);
            prop_assert_eq!(&back.results, &finished.results);
        }
    }

    #[tokio::test]
    async fn test_completion_rules() {
        let store = SqliteResultStore::open_in_memory().unwrap();
        let finished = completed_record();
        let pending = pending_of(&finished);

        assert!(matches!(
            store.complete(&finished).await,
            Err(StoreError::NotFound(_))
        ));
        store.create(&pending).await.unwrap();
        assert!(matches!(
            store.create(&pending).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.complete(&pending).await,
            Err(StoreError::NotTerminal(_))
        ));
        store.complete(&finished).await.unwrap();
        assert!(matches!(
            store.complete(&finished).await,
            Err(StoreError::AlreadyTerminal {
                status: EvaluationStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_listing_and_statistics() {
        let store = SqliteResultStore::open_in_memory().unwrap();

        let finished = completed_record();
        store.create(&pending_of(&finished)).await.unwrap();
        store.complete(&finished).await.unwrap();

        let mut failed = pending_of(&completed_record());
        failed.created_at += chrono::Duration::seconds(5);
        store.create(&failed).await.unwrap();
        failed.fail("No dimension succeeded");
        store.complete(&failed).await.unwrap();

        let mut open = pending_of(&completed_record());
        open.created_at += chrono::Duration::seconds(10);
        store.create(&open).await.unwrap();

        let ids: Vec<Uuid> = store.list(10).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![open.id, failed.id, finished.id]);

        let only_failed = store
            .list_by_status(EvaluationStatus::Failed, 10)
            .await
            .unwrap();
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].error.as_deref(), Some("No dimension succeeded"));

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.average_overall, Some(68.0));

        assert!(store.delete(open.id).await.unwrap());
        assert!(!store.delete(open.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evaluations.db");
        let finished = completed_record();

        {
            let store = SqliteResultStore::open(&path).unwrap();
            store.create(&pending_of(&finished)).await.unwrap();
            store.complete(&finished).await.unwrap();
        }

        let store = SqliteResultStore::open(&path).unwrap();
        let back = store.get(finished.id).await.unwrap().unwrap();
        assert_eq!(back.overall_score(), Some(68));
    }

    #[tokio::test]
    async fn test_legacy_keys_canonicalized_on_read() {
        let store = SqliteResultStore::open_in_memory()
            .unwrap()
            .with_aliases(Rubric::builtin().aliases);
        let legacy = legacy_record();
        store.create(&legacy).await.unwrap();

        let back = store.get(legacy.id).await.unwrap().unwrap();
        assert_eq!(
            back.results[0].dimension.as_str(),
            "cultural_responsiveness_integrated"
        );
        let listed = store.list(1).await.unwrap();
        assert!(listed[0]
            .composite
            .as_ref()
            .unwrap()
            .dimension_scores
            .contains_key("cultural_responsiveness_integrated"));
    }
}
