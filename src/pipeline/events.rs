//! Progress events emitted by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candidate::{BranchKey, ReasonCode};
use super::job::{ErrorClassification, JobId, JobStatus};

/// Events emitted while a job moves through the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// A stage started executing for a job.
    StageStarted {
        job_id: JobId,
        status: JobStatus,
        timestamp: DateTime<Utc>,
    },

    /// A transition was persisted.
    StageCompleted {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
        timestamp: DateTime<Utc>,
    },

    /// Semantic review failed and Generate will run again.
    RetryScheduled {
        job_id: JobId,
        iteration: u32,
        reason: ReasonCode,
        timestamp: DateTime<Utc>,
    },

    /// One post-processing branch reported.
    BranchCompleted {
        job_id: JobId,
        branch: BranchKey,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// The job reached `Ready`.
    JobReady {
        job_id: JobId,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// The job reached `Failed`.
    JobFailed {
        job_id: JobId,
        classification: ErrorClassification,
        failed_stage: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn stage_started(job_id: JobId, status: JobStatus) -> Self {
        Self::StageStarted {
            job_id,
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn stage_completed(job_id: JobId, from: JobStatus, to: JobStatus) -> Self {
        Self::StageCompleted {
            job_id,
            from,
            to,
            timestamp: Utc::now(),
        }
    }

    pub fn retry_scheduled(job_id: JobId, iteration: u32, reason: ReasonCode) -> Self {
        Self::RetryScheduled {
            job_id,
            iteration,
            reason,
            timestamp: Utc::now(),
        }
    }

    pub fn branch_completed(job_id: JobId, branch: BranchKey, success: bool) -> Self {
        Self::BranchCompleted {
            job_id,
            branch,
            success,
            timestamp: Utc::now(),
        }
    }

    pub fn job_ready(job_id: JobId, iterations: u32) -> Self {
        Self::JobReady {
            job_id,
            iterations,
            timestamp: Utc::now(),
        }
    }

    pub fn job_failed(
        job_id: JobId,
        classification: ErrorClassification,
        failed_stage: impl Into<String>,
    ) -> Self {
        Self::JobFailed {
            job_id,
            classification,
            failed_stage: failed_stage.into(),
            timestamp: Utc::now(),
        }
    }

    /// Job the event refers to.
    pub fn job_id(&self) -> JobId {
        match self {
            Self::StageStarted { job_id, .. }
            | Self::StageCompleted { job_id, .. }
            | Self::RetryScheduled { job_id, .. }
            | Self::BranchCompleted { job_id, .. }
            | Self::JobReady { job_id, .. }
            | Self::JobFailed { job_id, .. } => *job_id,
        }
    }
}
