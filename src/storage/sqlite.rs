//! SQLite-backed job store so jobs survive worker restarts.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use super::JobStore;
use crate::error::StoreError;
use crate::pipeline::job::{Job, JobId};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id          TEXT    NOT NULL PRIMARY KEY,
    pipeline_kind   TEXT    NOT NULL,
    status          TEXT    NOT NULL,
    iteration_count INTEGER NOT NULL DEFAULT 0,
    revision        INTEGER NOT NULL DEFAULT 0,

    -- Full job record as JSON
    body            TEXT    NOT NULL,

    created_at      TEXT    NOT NULL,
    updated_at      TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
"#;

#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        tracing::info!(path = path, "Job store opened");
        Ok(Self { pool })
    }

    async fn current_revision(&self, job_id: &JobId) -> Result<Option<u64>, StoreError> {
        let row = sqlx::query("SELECT revision FROM jobs WHERE job_id = ?1")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("revision") as u64))
    }
}

fn decode(body: &str) -> Result<Job, StoreError> {
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        let body = serde_json::to_string(job)?;
        sqlx::query(
            r#"INSERT INTO jobs (job_id, pipeline_kind, status, iteration_count, revision, body, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               ON CONFLICT(job_id) DO UPDATE SET
                 status = excluded.status,
                 iteration_count = excluded.iteration_count,
                 revision = excluded.revision,
                 body = excluded.body,
                 updated_at = excluded.updated_at"#,
        )
        .bind(job.job_id.to_string())
        .bind(job.pipeline_kind.to_string())
        .bind(job.status.as_str())
        .bind(job.iteration_count as i64)
        .bind(job.revision as i64)
        .bind(body)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT body FROM jobs WHERE job_id = ?1")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode(r.get::<&str, _>("body"))).transpose()
    }

    async fn put_job_if_revision(
        &self,
        job: &Job,
        expected_revision: u64,
    ) -> Result<Job, StoreError> {
        let mut stored = job.clone();
        stored.revision = expected_revision + 1;
        let body = serde_json::to_string(&stored)?;

        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = ?1, iteration_count = ?2, revision = ?3, body = ?4, updated_at = ?5
               WHERE job_id = ?6 AND revision = ?7"#,
        )
        .bind(stored.status.as_str())
        .bind(stored.iteration_count as i64)
        .bind(stored.revision as i64)
        .bind(body)
        .bind(stored.updated_at.to_rfc3339())
        .bind(stored.job_id.to_string())
        .bind(expected_revision as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(stored);
        }

        match self.current_revision(&job.job_id).await? {
            Some(actual) => Err(StoreError::Conflict {
                job_id: job.job_id,
                expected: expected_revision,
                actual,
            }),
            None => Err(StoreError::NotFound(job.job_id)),
        }
    }

    async fn list_active(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            "SELECT body FROM jobs WHERE status NOT IN ('READY', 'FAILED') ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| decode(r.get::<&str, _>("body")))
            .collect()
    }
}
