//! In-memory job store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::JobStore;
use crate::error::StoreError;
use crate::pipeline::job::{Job, JobId};

/// Job store backed by a process-local map.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn put_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn put_job_if_revision(
        &self,
        job: &Job,
        expected_revision: u64,
    ) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let current = jobs
            .get(&job.job_id)
            .ok_or(StoreError::NotFound(job.job_id))?;

        if current.revision != expected_revision {
            return Err(StoreError::Conflict {
                job_id: job.job_id,
                expected: expected_revision,
                actual: current.revision,
            });
        }

        let mut stored = job.clone();
        stored.revision = expected_revision + 1;
        jobs.insert(stored.job_id, stored.clone());
        Ok(stored)
    }

    async fn list_active(&self) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut active: Vec<Job> = jobs.values().filter(|j| !j.is_terminal()).cloned().collect();
        active.sort_by_key(|j| j.created_at);
        Ok(active)
    }
}
