//! Generate stage: obtain a candidate from the generation collaborator.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::StageError;
use crate::pipeline::candidate::Candidate;
use crate::pipeline::job::{Job, PipelineStage};
use crate::services::GenerationService;

const STAGE: PipelineStage = PipelineStage::Generate;

/// Calls the generation collaborator for a job.
pub struct Generator {
    service: Arc<dyn GenerationService>,
    timeout: Duration,
}

impl Generator {
    pub fn new(service: Arc<dyn GenerationService>, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    /// Produces a new candidate for `job`.
    ///
    /// On retries the last semantic failure is passed along as feedback.
    /// Collaborator failures are fatal `ExternalServiceError`s; an empty
    /// candidate or one of the wrong kind violates the generation contract
    /// and is a `StructuralError`.
    pub async fn generate(&self, job: &Job) -> Result<Candidate, StageError> {
        let feedback = if job.iteration_count > 0 {
            job.staging_artifacts.feedback.as_ref()
        } else {
            None
        };

        debug!(
            job_id = %job.job_id,
            iteration = job.iteration_count,
            has_feedback = feedback.is_some(),
            "Requesting candidate"
        );

        let candidate = tokio::time::timeout(
            self.timeout,
            self.service.generate(&job.primary_input, feedback),
        )
        .await
        .map_err(|_| StageError::timeout(STAGE, self.timeout))?
        .map_err(|e| StageError::from_service(STAGE, e))?;

        if candidate.kind() != job.pipeline_kind {
            return Err(StageError::structural(
                STAGE,
                format!(
                    "generated {} candidate for a {} job",
                    candidate.kind(),
                    job.pipeline_kind
                ),
            ));
        }
        if candidate.is_empty() {
            return Err(StageError::structural(STAGE, "generated candidate is empty"));
        }

        info!(
            job_id = %job.job_id,
            iteration = job.iteration_count,
            items = candidate.len(),
            "Candidate generated"
        );
        Ok(candidate)
    }
}
