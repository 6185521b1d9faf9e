//! Single write path for job failures.
//!
//! Every fatal stage error ends up here. The handler bounds the detail,
//! records an [`ErrorRecord`] and moves the job to `Failed`. If that write
//! fails, the failure is surfaced to the caller instead of being swallowed.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, warn};

use super::job::{ErrorRecord, Job, JobStatus};
use crate::error::{PersistenceFailure, StageError, StoreError};
use crate::storage::JobStore;
use crate::utils::text::{collapse_whitespace, truncate_chars};

/// Formats a failure detail for persistence.
///
/// Whitespace is collapsed, the classification is prefixed, and the result is
/// cut to at most `max_len` characters.
pub fn format_error_detail(err: &StageError, max_len: usize) -> String {
    let message = format!(
        "Type: {} | Msg: {}",
        err.classification,
        collapse_whitespace(&err.detail)
    );
    truncate_chars(&message, max_len)
}

/// Routes failed jobs to the `Failed` status.
pub struct ErrorHandler {
    store: Arc<dyn JobStore>,
    max_detail_length: usize,
}

impl ErrorHandler {
    pub fn new(store: Arc<dyn JobStore>, max_detail_length: usize) -> Self {
        Self {
            store,
            max_detail_length,
        }
    }

    /// Marks `job` as failed with `err`.
    ///
    /// Terminal jobs are returned unchanged. When another writer already moved
    /// the job on, the stored job is returned and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` if the store rejects the write.
    pub async fn fail(&self, job: &Job, err: &StageError) -> Result<Job, PersistenceFailure> {
        if job.is_terminal() {
            return Ok(job.clone());
        }

        let mut failed = job.clone();
        failed.status = JobStatus::Failed;
        failed.updated_at = Utc::now();
        failed.error_record = Some(ErrorRecord {
            classification: err.classification,
            detail: format_error_detail(err, self.max_detail_length),
            failed_stage: err.stage.to_string(),
            recorded_at: failed.updated_at,
        });

        match self.store.put_job_if_revision(&failed, job.revision).await {
            Ok(stored) => {
                warn!(
                    job_id = %job.job_id,
                    classification = %err.classification,
                    failed_stage = %err.stage,
                    "Job failed"
                );
                Ok(stored)
            }
            Err(StoreError::Conflict { .. }) => {
                let current = self
                    .store
                    .get_job(&job.job_id)
                    .await
                    .and_then(|found| found.ok_or(StoreError::NotFound(job.job_id)))
                    .map_err(|source| PersistenceFailure {
                        job_id: job.job_id,
                        source,
                    })?;
                warn!(
                    job_id = %job.job_id,
                    status = %current.status,
                    "Job moved on before its failure was recorded"
                );
                Ok(current)
            }
            Err(source) => {
                error!(
                    job_id = %job.job_id,
                    error = %source,
                    "Could not persist job failure"
                );
                Err(PersistenceFailure {
                    job_id: job.job_id,
                    source,
                })
            }
        }
    }
}
