//! Admission of jobs into the worker queue.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::JobEvent;
use crate::error::StoreError;
use crate::pipeline::{Job, JobId, JobStatus};
use crate::storage::JobStore;

/// Errors that can occur while dispatching jobs.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Every receiver of the job queue is gone.
    #[error("Job queue is closed")]
    QueueClosed,
}

/// Puts job ids on the queue the worker pool drains.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    tx: mpsc::UnboundedSender<JobEvent>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn JobStore>, tx: mpsc::UnboundedSender<JobEvent>) -> Self {
        Self { store, tx }
    }

    /// Starts a freshly created job.
    ///
    /// Only `Pending` jobs are admitted; returns `false` for anything else.
    pub fn trigger(&self, job: &Job) -> Result<bool, DispatchError> {
        if job.status != JobStatus::Pending {
            debug!(job_id = %job.job_id, status = %job.status, "Ignoring non-pending job");
            return Ok(false);
        }
        self.enqueue(job.job_id)?;
        Ok(true)
    }

    fn enqueue(&self, job_id: JobId) -> Result<(), DispatchError> {
        self.tx
            .send(JobEvent::new(job_id))
            .map_err(|_| DispatchError::QueueClosed)
    }

    /// Re-enqueues every non-terminal job in the store.
    ///
    /// Used after a restart; each job resumes at its persisted status.
    pub async fn recover(&self) -> Result<usize, DispatchError> {
        let active = self.store.list_active().await?;
        for job in &active {
            self.enqueue(job.job_id)?;
        }
        info!(recovered = active.len(), "Recovered active jobs");
        Ok(active.len())
    }
}
