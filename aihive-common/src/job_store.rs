//! The Job Store: a durable per-job record backed by a PostgreSQL table
//! named `manager`.
//!
//! This is not itself a queue: rows are never dequeued with `SKIP LOCKED`.
//! It is plain CRUD with one invariant the SQL enforces directly: status
//! never regresses.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use uuid::Uuid;

use crate::messages::TaskInputs;

#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("duplicate id: {0}")]
    DuplicateId(Uuid),
    #[error("no job with id {0}")]
    NotFound(Uuid),
}

pub type JobStoreResult<T> = std::result::Result<T, JobStoreError>;

/// Numeric encoding used as the `status` query parameter on callback PUTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, serde::Serialize, serde::Deserialize)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_webhook_code(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::InProgress => 1,
            JobStatus::Completed => 2,
            JobStatus::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Status only ever advances along
    /// `pending -> in_progress -> {completed,failed}`.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
            | (Pending, Completed)
            | (Pending, Failed)
            | (InProgress, Completed)
            | (InProgress, Failed)
        )
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub flavor: String,
    pub priority: i32,
    pub inputs: sqlx::types::Json<TaskInputs>,
    pub model: Option<String>,
    pub status: JobStatus,
    pub result: Option<sqlx::types::Json<Value>>,
    pub result_path: Option<String>,
    pub error: Option<String>,
    pub webhook_retry_count: i32,
    pub webhook_status_code: Option<i32>,
    pub itime: DateTime<Utc>,
    pub utime: DateTime<Utc>,
}

/// Fields required to insert a new, `pending` Job row.
pub struct NewJob {
    pub id: Uuid,
    pub flavor: String,
    pub priority: i32,
    pub inputs: TaskInputs,
    pub model: Option<String>,
}

pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub async fn new(url: &str) -> JobStoreResult<Self> {
        let pool = PgPoolOptions::new()
            .connect(url)
            .await
            .map_err(|error| JobStoreError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new `pending` row. Returns `DuplicateId` when `id` already
    /// exists, mapped from the unique-constraint violation rather than a
    /// pre-check, to stay race-free under concurrent inserts.
    pub async fn insert(&self, job: NewJob) -> JobStoreResult<Job> {
        let row = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO manager
            (id, flavor, priority, inputs, model, status, webhook_retry_count, itime, utime)
            VALUES
            ($1, $2, $3, $4, $5, 'pending', 0, NOW(), NOW())
            RETURNING
            id, flavor, priority, inputs, model, status, result, result_path, error,
            webhook_retry_count, webhook_status_code, itime, utime
            "#,
        )
            .bind(job.id)
            .bind(&job.flavor)
            .bind(job.priority)
            .bind(sqlx::types::Json(job.inputs))
            .bind(&job.model)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| {
                if is_unique_violation(&error) {
                    JobStoreError::DuplicateId(job.id)
                } else {
                    JobStoreError::QueryError {
                        command: "INSERT".to_owned(),
                        error,
                    }
                }
        })?;

        Ok(row)
    }

    pub async fn get(&self, id: Uuid) -> JobStoreResult<Job> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT id, flavor, priority, inputs, model, status, result, result_path, error,
            webhook_retry_count, webhook_status_code, itime, utime
            FROM manager
            WHERE id = $1
            "#,
        )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| JobStoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
        })?
            .ok_or(JobStoreError::NotFound(id))
    }

    /// Applies a result-message-driven transition. Status monotonicity and
    /// the result/error mutual exclusion with status are enforced here,
    /// inside the same check, rather than trusted to the caller: a
    /// regression or an already-terminal row leaves the row untouched and
    /// is reported via `Ok(None)` so the caller can log-and-drop.
    pub async fn apply_transition(
        &self,
        id: Uuid,
        next: JobStatus,
        result: Option<Value>,
        result_path: Option<String>,
        error: Option<String>,
    ) -> JobStoreResult<Option<Job>> {
        let current = match self.get(id).await {
            Ok(job) => job,
            Err(JobStoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        if !current.status.can_advance_to(next) {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, Job>(
            r#"
            UPDATE manager
            SET status = $2,
            result = $3,
            result_path = $4,
            error = $5,
            utime = NOW()
            WHERE id = $1
            RETURNING id, flavor, priority, inputs, model, status, result, result_path, error,
            webhook_retry_count, webhook_status_code, itime, utime
            "#,
        )
            .bind(id)
            .bind(next)
            .bind(result.map(sqlx::types::Json))
            .bind(&result_path)
            .bind(&error)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| JobStoreError::QueryError {
                command: "UPDATE".to_owned(),
                error,
        })?;

        Ok(Some(row))
    }

    /// Records the outcome of a Callback Client attempt.
    pub async fn record_webhook_attempt(
        &self,
        id: Uuid,
        status_code: Option<u16>,
        increment_retry: bool,
    ) -> JobStoreResult<()> {
        sqlx::query(
            r#"
            UPDATE manager
            SET webhook_status_code = $2,
            webhook_retry_count = webhook_retry_count + CASE WHEN $3 THEN 1 ELSE 0 END,
            utime = NOW()
            WHERE id = $1
            "#,
        )
            .bind(id)
            .bind(status_code.map(i32::from))
            .bind(increment_retry)
            .execute(&self.pool)
            .await
            .map_err(|error| JobStoreError::QueryError {
                command: "UPDATE".to_owned(),
                error,
        })?;

        Ok(())
    }

    /// Deletes a row outright. Used by the Janitor's stale-pending sweep to
    /// remove rows abandoned after a publish failure left them stuck in
    /// `pending` with no task ever dispatched.
    pub async fn delete(&self, id: Uuid) -> JobStoreResult<()> {
        sqlx::query("DELETE FROM manager WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|error| JobStoreError::QueryError {
                command: "DELETE".to_owned(),
                error,
        })?;

        Ok(())
    }

    /// Rows the Janitor should consider when sweeping staged files: terminal
    /// rows whose `utime` is older than `retention`, used to decide whether
    /// a staged file still has a live owner.
    pub async fn terminal_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> JobStoreResult<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT id, flavor, priority, inputs, model, status, result, result_path, error,
            webhook_retry_count, webhook_status_code, itime, utime
            FROM manager
            WHERE status IN ('completed', 'failed') AND utime < $1
            "#,
        )
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| JobStoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
        })
    }

    /// Rows stuck in `pending` past `cutoff`: a publish failure after a
    /// successful insert leaves the row in `pending` with no task ever
    /// dispatched, and the Janitor eventually removes such abandoned rows
    /// after a configured stale threshold. Deleting these also frees their
    /// staged input file, since nothing else references it once the row is
    /// gone.
    pub async fn stale_pending_before(&self, cutoff: DateTime<Utc>) -> JobStoreResult<Vec<Job>> {
        sqlx::query_as::<_, Job>(
            r#"
            SELECT id, flavor, priority, inputs, model, status, result, result_path, error,
            webhook_retry_count, webhook_status_code, itime, utime
            FROM manager
            WHERE status = 'pending' AND itime < $1
            "#,
        )
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| JobStoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
        })
    }

    /// Whether any row (terminal or not) currently claims `id` — used by the
    /// Janitor to distinguish an orphaned staged file from one still owned
    /// by a live job.
    pub async fn exists(&self, id: Uuid) -> JobStoreResult<bool> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM manager WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| JobStoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
        })?;

        Ok(row.is_some())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error.as_database_error().and_then(|e| e.code()),
        Some(code) if code == "23505"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_monotonicity_rejects_regression() {
        assert!(JobStatus::Pending.can_advance_to(JobStatus::InProgress));
        assert!(JobStatus::InProgress.can_advance_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_advance_to(JobStatus::InProgress));
        assert!(!JobStatus::Failed.can_advance_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_advance_to(JobStatus::Pending));
    }

    #[test]
    fn webhook_codes_use_the_documented_numeric_encoding() {
        assert_eq!(JobStatus::Pending.as_webhook_code(), 0);
        assert_eq!(JobStatus::InProgress.as_webhook_code(), 1);
        assert_eq!(JobStatus::Completed.as_webhook_code(), 2);
        assert_eq!(JobStatus::Failed.as_webhook_code(), 3);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
