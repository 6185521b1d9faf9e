//! Semantic review stage.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::StageError;
use crate::pipeline::candidate::{Candidate, ReasonCode, ValidationResult};
use crate::pipeline::job::{PipelineStage, PrimaryInput};
use crate::services::JudgeService;

const STAGE: PipelineStage = PipelineStage::ValidateSemantics;

/// Delegates meaning-level review to the judge collaborator.
pub struct SemanticValidator {
    judge: Arc<dyn JudgeService>,
    timeout: Duration,
}

impl SemanticValidator {
    pub fn new(judge: Arc<dyn JudgeService>, timeout: Duration) -> Self {
        Self { judge, timeout }
    }

    /// Reviews a structurally valid candidate.
    ///
    /// A failed review is returned as `Ok` with `passed == false`; only judge
    /// failures are errors.
    pub async fn review(
        &self,
        input: &PrimaryInput,
        candidate: &Candidate,
    ) -> Result<ValidationResult, StageError> {
        let mut result = tokio::time::timeout(self.timeout, self.judge.judge(input, candidate))
            .await
            .map_err(|_| StageError::timeout(STAGE, self.timeout))?
            .map_err(|e| StageError::from_service(STAGE, e))?;

        if !result.passed && result.reason_code == ReasonCode::Ok {
            result.reason_code = ReasonCode::Other;
        }
        if result.passed {
            result.reason_code = ReasonCode::Ok;
        }

        info!(
            passed = result.passed,
            reason = %result.reason_code,
            "Semantic review finished"
        );
        Ok(result)
    }
}
