//! Job record persistence.
//!
//! The [`JobStore`] trait is the only way stages read or write job state.
//! Two implementations are provided:
//!
//! - [`MemoryJobStore`]: process-local map, used by tests and one-shot CLI runs
//! - [`SqliteJobStore`]: durable SQLite database, used by the worker pool
//!
//! # Conditional writes
//!
//! Every job carries a `revision`. [`JobStore::put_job_if_revision`] only
//! succeeds when the stored revision still equals the expected one, and bumps
//! it on success. A worker that loses the race gets [`StoreError::Conflict`]
//! and drops its result, which keeps at most one logical writer per job.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::pipeline::job::{Job, JobId};

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

/// Persistence for job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Writes the job unconditionally (last writer wins).
    async fn put_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Reads a job by id.
    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError>;

    /// Writes the job only if the stored revision equals `expected_revision`.
    ///
    /// On success the stored copy has `revision = expected_revision + 1` and is
    /// returned.
    async fn put_job_if_revision(&self, job: &Job, expected_revision: u64)
        -> Result<Job, StoreError>;

    /// Returns every job that has not reached a terminal status.
    async fn list_active(&self) -> Result<Vec<Job>, StoreError>;
}
