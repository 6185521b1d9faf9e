//! Error types for content-forge operations.
//!
//! Defines error types for each subsystem:
//! - LLM API interactions
//! - External collaborator services (generation, judging, synthesis)
//! - Job store persistence
//! - Workflow stage failures and their classification

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::job::{ErrorClassification, JobId, PipelineStage, TransitionError};

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors returned by external collaborators.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The collaborator could not be reached or refused the request.
    #[error("Service request failed: {0}")]
    RequestFailed(String),

    /// The collaborator answered with something that could not be understood.
    #[error("Malformed service response: {0}")]
    MalformedResponse(String),

    /// The collaborator returned an empty result.
    #[error("Service returned no content: {0}")]
    EmptyResponse(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

/// Errors that can occur in a job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// A conditional write lost against a concurrent writer.
    #[error("Revision conflict on job {job_id}: expected {expected}, found {actual}")]
    Conflict {
        job_id: JobId,
        expected: u64,
        actual: u64,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A failure raised by a stage executor, already classified.
#[derive(Debug, Clone, Error)]
#[error("{classification} in {stage}: {detail}")]
pub struct StageError {
    pub stage: PipelineStage,
    pub classification: ErrorClassification,
    pub detail: String,
}

impl StageError {
    pub fn new(
        stage: PipelineStage,
        classification: ErrorClassification,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            classification,
            detail: detail.into(),
        }
    }

    pub fn structural(stage: PipelineStage, detail: impl Into<String>) -> Self {
        Self::new(stage, ErrorClassification::StructuralError, detail)
    }

    pub fn external(stage: PipelineStage, detail: impl Into<String>) -> Self {
        Self::new(stage, ErrorClassification::ExternalServiceError, detail)
    }

    pub fn persistence(stage: PipelineStage, detail: impl Into<String>) -> Self {
        Self::new(stage, ErrorClassification::PersistenceError, detail)
    }

    /// Maps a collaborator error onto this stage.
    pub fn from_service(stage: PipelineStage, err: ServiceError) -> Self {
        Self::external(stage, err.to_string())
    }

    /// Builds the error for a collaborator call that ran past its deadline.
    pub fn timeout(stage: PipelineStage, after: Duration) -> Self {
        Self::external(stage, format!("timed out after {:?}", after))
    }

    /// Rebinds the error to another stage label.
    pub fn at(mut self, stage: PipelineStage) -> Self {
        self.stage = stage;
        self
    }
}

impl From<TransitionError> for StageError {
    fn from(err: TransitionError) -> Self {
        StageError::structural(PipelineStage::for_status(err.from), err.to_string())
    }
}

/// The error handler could not record a failure.
///
/// This is the only error that escapes `Orchestrator::advance`.
#[derive(Debug, Error)]
#[error("Failed to persist failure of job {job_id}: {source}")]
pub struct PersistenceFailure {
    pub job_id: JobId,
    #[source]
    pub source: StoreError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_detail_keeps_sub_second_deadlines() {
        let err = StageError::timeout(PipelineStage::Generate, Duration::from_millis(250));
        assert_eq!(err.classification, ErrorClassification::ExternalServiceError);
        assert_eq!(err.detail, "timed out after 250ms");

        let err = StageError::timeout(PipelineStage::Compose, Duration::from_secs(300));
        assert_eq!(err.detail, "timed out after 300s");
    }

    #[test]
    fn test_stage_error_can_be_relabeled() {
        let err = StageError::external(PipelineStage::PostProcess { branch: 0 }, "503")
            .at(PipelineStage::PostProcess { branch: 2 });
        assert_eq!(err.stage.to_string(), "postProcess:branch2");
    }
}
