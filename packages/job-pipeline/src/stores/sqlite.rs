//! SQLite storage implementation.
//!
//! The durable backend. One `jobs` table holds a row per posting:
//!
//! | column            | type    | notes                               |
//! |-------------------|---------|-------------------------------------|
//! | `job_id`          | TEXT    | primary key                         |
//! | `raw_data`        | TEXT    | JSON, set once                      |
//! | `normalized_data` | TEXT    | JSON, nullable                      |
//! | `decision_data`   | TEXT    | JSON, nullable                      |
//! | `plan_data`       | TEXT    | JSON, nullable                      |
//! | `materials_data`  | TEXT    | JSON, nullable (additive)           |
//! | `state`           | TEXT    | `JobState` label                    |
//! | `attempts`        | INTEGER | retry counter (additive)            |
//! | `last_error`      | TEXT    | nullable (additive)                 |
//! | `created_at`      | TEXT    | RFC 3339 (additive)                 |
//! | `updated_at`      | TEXT    | RFC 3339 (additive)                 |
//!
//! Every mutation is a single `UPDATE ... WHERE job_id = ? AND state = ?`,
//! so SQLite's statement atomicity gives the all-or-nothing guarantee.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::traits::store::{validate_update, JobStore, UpdateOutcome};
use crate::types::job::{Artifact, JobRecord, JobState};

const JOB_COLUMNS: &str = "job_id, raw_data, normalized_data, decision_data, plan_data, \
     materials_data, state, attempts, last_error, created_at, updated_at";

/// Columns added after the original layout. Older databases get them via
/// `ALTER TABLE ... ADD COLUMN`.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("materials_data", "TEXT"),
    ("attempts", "INTEGER NOT NULL DEFAULT 0"),
    ("last_error", "TEXT"),
    ("created_at", "TEXT NOT NULL DEFAULT ''"),
    ("updated_at", "TEXT NOT NULL DEFAULT ''"),
];

/// SQLite-based job store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) a database at the given URL.
    ///
    /// # Example URLs
    /// - `sqlite://jobs.db` - File-based database, created if missing
    /// - `sqlite:///var/lib/job-pipeline/jobs.db` - Absolute path
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!(database_url, "opened job store");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Uses a single long-lived connection: every SQLite in-memory
    /// connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                raw_data TEXT NOT NULL,
                normalized_data TEXT,
                decision_data TEXT,
                plan_data TEXT,
                materials_data TEXT,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL DEFAULT ''
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        let existing: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info('jobs')")
                .fetch_all(&self.pool)
                .await?;

        for (column, ddl) in ADDITIVE_COLUMNS {
            if existing.iter().any(|(name,)| name == column) {
                continue;
            }
            debug!(column, "adding missing column to jobs table");
            sqlx::query(&format!("ALTER TABLE jobs ADD COLUMN {column} {ddl}"))
                .execute(&self.pool)
                .await?;
        }

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Distinguish a lost race from a missing row after a zero-row update.
    async fn conflict_or_missing(&self, job_id: &str) -> Result<UpdateOutcome> {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match exists {
            Some(_) => Ok(UpdateOutcome::Conflict),
            None => Err(PipelineError::JobNotFound {
                job_id: job_id.to_string(),
            }),
        }
    }

    async fn fetch_rows(&self, sql: &str) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(sql)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRow::into_record).collect()
    }
}

// Row type for sqlx queries
#[derive(Debug, FromRow)]
struct JobRow {
    job_id: String,
    raw_data: String,
    normalized_data: Option<String>,
    decision_data: Option<String>,
    plan_data: Option<String>,
    materials_data: Option<String>,
    state: String,
    attempts: i64,
    last_error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn into_record(self) -> Result<JobRecord> {
        let job_id = self.job_id;
        let corrupt = |reason: String| PipelineError::CorruptRow {
            job_id: job_id.clone(),
            reason,
        };

        let json = |column: &str, text: &str| -> Result<Value> {
            serde_json::from_str(text).map_err(|e| corrupt(format!("invalid {column} JSON: {e}")))
        };
        let optional_json = |column: &str, text: Option<String>| -> Result<Option<Value>> {
            text.map(|t| json(column, &t)).transpose()
        };
        let timestamp = |column: &str, text: &str| -> Result<DateTime<Utc>> {
            if text.is_empty() {
                // Rows written before timestamps existed
                return Ok(DateTime::<Utc>::default());
            }
            DateTime::parse_from_rfc3339(text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("invalid {column}: {e}")))
        };

        let state = JobState::from_str(&self.state)
            .map_err(|_| corrupt(format!("unknown state label {}", self.state)))?;

        Ok(JobRecord {
            raw_data: json("raw_data", &self.raw_data)?,
            normalized_data: optional_json("normalized_data", self.normalized_data)?,
            decision_data: optional_json("decision_data", self.decision_data)?,
            plan_data: optional_json("plan_data", self.plan_data)?,
            materials_data: optional_json("materials_data", self.materials_data)?,
            state,
            attempts: u32::try_from(self.attempts).unwrap_or(u32::MAX),
            last_error: self.last_error,
            created_at: timestamp("created_at", &self.created_at)?,
            updated_at: timestamp("updated_at", &self.updated_at)?,
            job_id,
        })
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn put_new(&self, job_id: &str, raw_data: &Value) -> Result<bool> {
        let raw = serde_json::to_string(raw_data)?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (job_id, raw_data, state, attempts, created_at, updated_at)
            VALUES (?, ?, ?, 0, ?, ?)
            ON CONFLICT(job_id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(&raw)
        .bind(JobState::INITIAL.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRow::into_record).transpose()
    }

    async fn list_active(&self) -> Result<Vec<JobRecord>> {
        let terminal = [JobState::Submitted, JobState::Rejected, JobState::Failed]
            .map(|s| format!("'{}'", s.as_str()))
            .join(", ");
        self.fetch_rows(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE state NOT IN ({terminal}) ORDER BY rowid ASC"
        ))
        .await
    }

    async fn list_all(&self) -> Result<Vec<JobRecord>> {
        self.fetch_rows(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY rowid ASC"))
            .await
    }

    async fn update(
        &self,
        job_id: &str,
        expected: JobState,
        new_state: JobState,
        artifact: Option<&Artifact>,
    ) -> Result<UpdateOutcome> {
        validate_update(expected, new_state, artifact)?;
        let now = Utc::now().to_rfc3339();

        let result = match artifact {
            Some(artifact) => {
                let column = artifact.field.column();
                let value = serde_json::to_string(&artifact.value)?;
                sqlx::query(&format!(
                    r#"
                    UPDATE jobs
                    SET state = ?, {column} = ?, attempts = 0, last_error = NULL, updated_at = ?
                    WHERE job_id = ? AND state = ? AND {column} IS NULL
                    "#
                ))
                .bind(new_state.as_str())
                .bind(&value)
                .bind(&now)
                .bind(job_id)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = ?, attempts = 0, last_error = NULL, updated_at = ?
                    WHERE job_id = ? AND state = ?
                    "#,
                )
                .bind(new_state.as_str())
                .bind(&now)
                .bind(job_id)
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?
            }
        };

        if result.rows_affected() > 0 {
            Ok(UpdateOutcome::Applied)
        } else {
            self.conflict_or_missing(job_id).await
        }
    }

    async fn record_retry(
        &self,
        job_id: &str,
        expected: JobState,
        attempts: u32,
        reason: &str,
    ) -> Result<UpdateOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET attempts = attempts + 1, last_error = ?, updated_at = ?
            WHERE job_id = ? AND state = ? AND attempts = ?
            "#,
        )
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .bind(expected.as_str())
        .bind(i64::from(attempts))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(UpdateOutcome::Applied)
        } else {
            self.conflict_or_missing(job_id).await
        }
    }

    async fn mark_failed(
        &self,
        job_id: &str,
        expected: JobState,
        attempts: u32,
        reason: &str,
    ) -> Result<UpdateOutcome> {
        validate_update(expected, JobState::Failed, None)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, last_error = ?, updated_at = ?
            WHERE job_id = ? AND state = ? AND attempts = ?
            "#,
        )
        .bind(JobState::Failed.as_str())
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id)
        .bind(expected.as_str())
        .bind(i64::from(attempts))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            Ok(UpdateOutcome::Applied)
        } else {
            self.conflict_or_missing(job_id).await
        }
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::job::ArtifactField;
    use serde_json::json;
    use std::sync::Arc;

    fn database_url(dir: &tempfile::TempDir) -> String {
        format!("sqlite://{}", dir.path().join("jobs.db").display())
    }

    #[tokio::test]
    async fn test_put_new_and_get() {
        let store = SqliteStore::in_memory().await.unwrap();
        let raw = json!({"title": "UX Designer"});

        assert!(store.put_new("j1", &raw).await.unwrap());
        assert!(!store.put_new("j1", &json!({"title": "other"})).await.unwrap());

        let job = store.get("j1").await.unwrap().unwrap();
        assert_eq!(job.raw_data, raw);
        assert_eq!(job.state, JobState::Discovered);
        assert!(job.normalized_data.is_none());
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_writes_artifact_and_state_together() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put_new("j1", &json!({})).await.unwrap();

        let artifact = Artifact::new(ArtifactField::Normalized, json!({"title": "ux designer"}));
        let outcome = store
            .update("j1", JobState::Discovered, JobState::Normalized, Some(&artifact))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Applied);

        let job = store.get("j1").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Normalized);
        assert_eq!(job.normalized_data, Some(json!({"title": "ux designer"})));

        let stale = store
            .update("j1", JobState::Discovered, JobState::Normalized, Some(&artifact))
            .await
            .unwrap();
        assert_eq!(stale, UpdateOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_append_only_guard_leaves_row_untouched() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put_new("j1", &json!({})).await.unwrap();
        sqlx::query("UPDATE jobs SET normalized_data = '{\"kept\":true}' WHERE job_id = 'j1'")
            .execute(store.pool())
            .await
            .unwrap();

        let artifact = Artifact::new(ArtifactField::Normalized, json!({"kept": false}));
        let outcome = store
            .update("j1", JobState::Discovered, JobState::Normalized, Some(&artifact))
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::Conflict);

        let job = store.get("j1").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Discovered);
        assert_eq!(job.normalized_data, Some(json!({"kept": true})));
    }

    #[tokio::test]
    async fn test_retry_and_fail_bookkeeping() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put_new("j1", &json!({})).await.unwrap();

        store
            .record_retry("j1", JobState::Discovered, 0, "timeout")
            .await
            .unwrap();
        store
            .record_retry("j1", JobState::Discovered, 1, "timeout again")
            .await
            .unwrap();
        let job = store.get("j1").await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some("timeout again"));

        store
            .mark_failed("j1", JobState::Discovered, 2, "bad payload")
            .await
            .unwrap();
        let job = store.get("j1").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(store.list_active().await.unwrap().is_empty());

        let retry_after_fail = store
            .record_retry("j1", JobState::Discovered, 2, "late")
            .await
            .unwrap();
        assert_eq!(retry_after_fail, UpdateOutcome::Conflict);
    }

    #[tokio::test]
    async fn test_retry_guarded_by_attempts() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put_new("j1", &json!({})).await.unwrap();

        let first = store
            .record_retry("j1", JobState::Discovered, 0, "timeout")
            .await
            .unwrap();
        let stale = store
            .record_retry("j1", JobState::Discovered, 0, "timeout")
            .await
            .unwrap();
        assert_eq!(first, UpdateOutcome::Applied);
        assert_eq!(stale, UpdateOutcome::Conflict);

        let stale_fail = store
            .mark_failed("j1", JobState::Discovered, 0, "budget spent")
            .await
            .unwrap();
        assert_eq!(stale_fail, UpdateOutcome::Conflict);

        let job = store.get("j1").await.unwrap().unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.state, JobState::Discovered);
    }

    #[tokio::test]
    async fn test_update_missing_job_is_not_found() {
        let store = SqliteStore::in_memory().await.unwrap();
        let err = store
            .mark_failed("ghost", JobState::Discovered, 0, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(&dir);

        {
            let store = SqliteStore::new(&url).await.unwrap();
            store.put_new("j1", &json!({"title": "a"})).await.unwrap();
            store.put_new("j2", &json!({"title": "b"})).await.unwrap();
            let artifact = Artifact::new(ArtifactField::Normalized, json!({"title": "a"}));
            store
                .update("j1", JobState::Discovered, JobState::Normalized, Some(&artifact))
                .await
                .unwrap();
            // Dropped without close(), as in a crash after commit
        }

        let reopened = SqliteStore::new(&url).await.unwrap();
        let j1 = reopened.get("j1").await.unwrap().unwrap();
        assert_eq!(j1.state, JobState::Normalized);
        assert_eq!(j1.normalized_data, Some(json!({"title": "a"})));

        let ids: Vec<_> = reopened
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(ids, vec!["j1", "j2"]);
        reopened.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_updates_exactly_one_wins() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::new(&database_url(&dir)).await.unwrap());
        store.put_new("j1", &json!({})).await.unwrap();

        let racer = |value: Value| {
            let store = store.clone();
            tokio::spawn(async move {
                let artifact = Artifact::new(ArtifactField::Normalized, value);
                store
                    .update("j1", JobState::Discovered, JobState::Normalized, Some(&artifact))
                    .await
                    .unwrap()
            })
        };

        let (a, b) = tokio::join!(racer(json!({"by": "a"})), racer(json!({"by": "b"})));
        let outcomes = [a.unwrap(), b.unwrap()];

        assert_eq!(
            outcomes.iter().filter(|o| o.is_applied()).count(),
            1,
            "exactly one racer must win: {outcomes:?}"
        );
        assert!(outcomes.contains(&UpdateOutcome::Conflict));
    }

    #[tokio::test]
    async fn test_adds_missing_columns_to_old_layout() {
        let dir = tempfile::tempdir().unwrap();
        let url = database_url(&dir);

        {
            let options = SqliteConnectOptions::from_str(&url)
                .unwrap()
                .create_if_missing(true);
            let pool = SqlitePool::connect_with(options).await.unwrap();
            sqlx::query(
                r#"
                CREATE TABLE jobs (
                    job_id TEXT PRIMARY KEY,
                    raw_data TEXT NOT NULL,
                    normalized_data TEXT,
                    decision_data TEXT,
                    plan_data TEXT,
                    state TEXT NOT NULL
                );
                INSERT INTO jobs (job_id, raw_data, state) VALUES ('old', '{}', 'NORMALIZED');
                "#,
            )
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;
        }

        let store = SqliteStore::new(&url).await.unwrap();
        let job = store.get("old").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Normalized);
        assert_eq!(job.attempts, 0);
        assert!(job.materials_data.is_none());
    }
}
