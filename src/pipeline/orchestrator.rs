//! Pipeline orchestrator: the state machine that drives a job.
//!
//! `advance` moves a job exactly one stage forward and persists the result
//! with a conditional write on the job's revision before returning. Workers
//! can therefore call it on any persisted job, at any time, and at most one
//! of several concurrent callers wins the write.
//!
//! ```text
//! PENDING -> GENERATING -> VALIDATING -> SEMANTIC_REVIEW -> POST_PROCESSING -> COMPOSING -> READY
//!                ^                              |
//!                +-------- retry (bounded) -----+        any stage --> FAILED
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::candidate::Candidate;
use super::config::{ConfigError, PipelineConfig};
use super::error_handler::ErrorHandler;
use super::events::PipelineEvent;
use super::fanout::fan_out;
use super::job::{
    ErrorClassification, InputError, Job, JobId, JobStatus, PipelineStage, PrimaryInput,
};
use super::retry::{RetryController, RetryDecision};
use crate::error::{PersistenceFailure, StageError, StoreError};
use crate::metrics::MetricsCollector;
use crate::services::{GenerationService, JudgeService, SynthesisService};
use crate::stages::{
    BranchExecutor, Composer, Generator, SemanticValidator, StructureRules, StructureValidator,
};
use crate::storage::JobStore;

/// Errors returned by the orchestrator's convenience entry points.
///
/// `advance` itself only ever fails with a [`PersistenceFailure`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The submitted input was rejected.
    #[error(transparent)]
    InvalidInput(#[from] InputError),

    /// The job could not be stored or loaded.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A failure could not be recorded.
    #[error(transparent)]
    Persistence(#[from] PersistenceFailure),

    /// The job did not settle within the transition guard.
    #[error("Job {job_id} still {status} after {transitions} transitions")]
    TransitionLimit {
        job_id: JobId,
        status: JobStatus,
        transitions: usize,
    },
}

/// Counters describing what the orchestrator has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    /// Calls to `advance` on non-terminal jobs.
    pub advances: u64,
    /// Jobs this orchestrator moved to `Ready`.
    pub ready: u64,
    /// Jobs this orchestrator moved to `Failed`.
    pub failed: u64,
    /// Regeneration rounds scheduled.
    pub retries: u64,
    /// Writes lost to a concurrent advance of the same job.
    pub superseded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    advances: AtomicU64,
    ready: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    superseded: AtomicU64,
}

/// What a call to [`Orchestrator::advance_outcome`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// This call persisted the next state.
    Moved(Job),
    /// Another writer moved the job first; this is the stored job.
    Superseded(Job),
    /// The job was already terminal.
    Unchanged(Job),
}

impl AdvanceOutcome {
    pub fn job(&self) -> &Job {
        match self {
            AdvanceOutcome::Moved(job)
            | AdvanceOutcome::Superseded(job)
            | AdvanceOutcome::Unchanged(job) => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            AdvanceOutcome::Moved(job)
            | AdvanceOutcome::Superseded(job)
            | AdvanceOutcome::Unchanged(job) => job,
        }
    }

    pub fn is_moved(&self) -> bool {
        matches!(self, AdvanceOutcome::Moved(_))
    }
}

/// Result of running a single stage.
enum StepOutcome {
    /// The next state was persisted.
    Committed(Job),
    /// Another writer moved the job first; this is the stored job.
    Superseded(Job),
    /// The stage failed; `job` is the state the failure is recorded against.
    Failed { job: Job, error: StageError },
}

/// Drives jobs through the generation workflow.
pub struct Orchestrator {
    config: PipelineConfig,
    store: Arc<dyn JobStore>,
    generator: Generator,
    structure: StructureValidator,
    semantics: SemanticValidator,
    retry: RetryController,
    branches: Arc<BranchExecutor>,
    composer: Composer,
    error_handler: ErrorHandler,
    event_tx: Option<mpsc::Sender<PipelineEvent>>,
    metrics: MetricsCollector,
    counters: Counters,
}

impl Orchestrator {
    /// Creates an orchestrator over the given store and collaborators.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `config` does not validate.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn JobStore>,
        generation: Arc<dyn GenerationService>,
        judge: Arc<dyn JudgeService>,
        synthesis: Arc<dyn SynthesisService>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let timeout = config.stage_timeout;
        Ok(Self {
            generator: Generator::new(generation, timeout),
            structure: StructureValidator::new(StructureRules::from_config(&config)),
            semantics: SemanticValidator::new(judge, timeout),
            retry: RetryController::new(config.max_iterations),
            branches: Arc::new(BranchExecutor::new(synthesis, timeout)),
            composer: Composer::new(config.branch_count),
            error_handler: ErrorHandler::new(Arc::clone(&store), config.max_error_detail_length),
            store,
            config,
            event_tx: None,
            metrics: MetricsCollector::new(),
            counters: Counters::default(),
        })
    }

    /// Sends progress events to `tx`.
    pub fn with_event_sender(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            advances: self.counters.advances.load(Ordering::Relaxed),
            ready: self.counters.ready.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            superseded: self.counters.superseded.load(Ordering::Relaxed),
        }
    }

    /// Validates `input`, then creates and persists a `Pending` job for it.
    pub async fn submit(&self, input: PrimaryInput) -> Result<Job, OrchestratorError> {
        input.validate()?;
        let job = Job::new(input);
        self.store.put_job(&job).await?;
        info!(job_id = %job.job_id, kind = %job.pipeline_kind, "Job submitted");
        Ok(job)
    }

    /// Advances `job` by exactly one stage.
    ///
    /// Terminal jobs are returned unchanged. Stage failures are routed to the
    /// error handler and come back as a `Failed` job. When another worker
    /// advanced the job first, the stored job is returned and nothing else
    /// happens.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceFailure` only when a failure could not be recorded.
    pub async fn advance(&self, job: &Job) -> Result<Job, PersistenceFailure> {
        self.advance_outcome(job).await.map(AdvanceOutcome::into_job)
    }

    /// Like [`advance`](Self::advance), but tells apart who moved the job.
    pub async fn advance_outcome(&self, job: &Job) -> Result<AdvanceOutcome, PersistenceFailure> {
        if job.is_terminal() {
            debug!(job_id = %job.job_id, status = %job.status, "Job already terminal");
            return Ok(AdvanceOutcome::Unchanged(job.clone()));
        }

        self.counters.advances.fetch_add(1, Ordering::Relaxed);
        let stage = PipelineStage::for_status(job.status);
        let started = Instant::now();
        self.emit(PipelineEvent::stage_started(job.job_id, job.status))
            .await;

        match self.step(job).await {
            StepOutcome::Committed(next) => {
                self.metrics.record_stage(
                    &stage.to_string(),
                    "committed",
                    started.elapsed().as_secs_f64(),
                );
                info!(
                    job_id = %job.job_id,
                    from = %job.status,
                    to = %next.status,
                    iteration = next.iteration_count,
                    "Stage committed"
                );
                self.emit(PipelineEvent::stage_completed(
                    job.job_id,
                    job.status,
                    next.status,
                ))
                .await;

                if next.status == JobStatus::Ready {
                    self.counters.ready.fetch_add(1, Ordering::Relaxed);
                    self.metrics
                        .record_job(&next.pipeline_kind.to_string(), next.status.as_str());
                    self.emit(PipelineEvent::job_ready(next.job_id, next.iteration_count))
                        .await;
                }
                Ok(AdvanceOutcome::Moved(next))
            }
            StepOutcome::Superseded(current) => {
                self.counters.superseded.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_stage(
                    &stage.to_string(),
                    "superseded",
                    started.elapsed().as_secs_f64(),
                );
                info!(
                    job_id = %job.job_id,
                    expected = %job.status,
                    current = %current.status,
                    "Job advanced by another worker"
                );
                Ok(AdvanceOutcome::Superseded(current))
            }
            StepOutcome::Failed { job: at, error } => {
                self.metrics.record_stage(
                    &stage.to_string(),
                    "failed",
                    started.elapsed().as_secs_f64(),
                );
                let failed = self.error_handler.fail(&at, &error).await?;

                // The handler returns the stored job when it lost the race.
                if failed.status != JobStatus::Failed || failed.revision != at.revision + 1 {
                    self.counters.superseded.fetch_add(1, Ordering::Relaxed);
                    return Ok(AdvanceOutcome::Superseded(failed));
                }

                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .record_job(&failed.pipeline_kind.to_string(), failed.status.as_str());
                self.emit(PipelineEvent::job_failed(
                    failed.job_id,
                    error.classification,
                    error.stage.to_string(),
                ))
                .await;
                Ok(AdvanceOutcome::Moved(failed))
            }
        }
    }

    /// Advances `job` until it is terminal.
    ///
    /// Bounded by [`PipelineConfig::max_transitions`].
    pub async fn run_to_completion(&self, job: Job) -> Result<Job, OrchestratorError> {
        let limit = self.config.max_transitions();
        let mut current = job;

        for _ in 0..limit {
            if current.is_terminal() {
                return Ok(current);
            }
            current = self.advance(&current).await?;
        }

        if current.is_terminal() {
            Ok(current)
        } else {
            warn!(job_id = %current.job_id, status = %current.status, "Transition guard hit");
            Err(OrchestratorError::TransitionLimit {
                job_id: current.job_id,
                status: current.status,
                transitions: limit,
            })
        }
    }

    async fn step(&self, job: &Job) -> StepOutcome {
        match self.run_stage(job).await {
            Ok(outcome) => outcome,
            Err(error) => StepOutcome::Failed {
                job: job.clone(),
                error,
            },
        }
    }

    async fn run_stage(&self, job: &Job) -> Result<StepOutcome, StageError> {
        let mut next = job.clone();

        match job.status {
            JobStatus::Pending => {
                next.transition_to(JobStatus::Generating)?;
            }

            JobStatus::Generating => {
                let candidate = self.generator.generate(job).await?;
                next.staging_artifacts.raw = Some(candidate);
                next.transition_to(JobStatus::Validating)?;
            }

            JobStatus::Validating => {
                let raw = job.staging_artifacts.raw.as_ref().ok_or_else(|| {
                    StageError::structural(
                        PipelineStage::ValidateStructure,
                        "no generated candidate to validate",
                    )
                })?;
                let validated = self
                    .structure
                    .validate(&job.job_id, &job.primary_input, raw)
                    .map_err(|result| {
                        StageError::structural(PipelineStage::ValidateStructure, result.detail)
                    })?;
                next.staging_artifacts.validated = Some(validated);
                next.transition_to(JobStatus::SemanticReview)?;
            }

            JobStatus::SemanticReview => {
                let validated = self.validated(job, PipelineStage::ValidateSemantics)?;
                let result = self.semantics.review(&job.primary_input, validated).await?;

                match self.retry.decide(job.iteration_count, &result) {
                    RetryDecision::Proceed => {
                        next.transition_to(JobStatus::PostProcessing)?;
                    }
                    RetryDecision::Retry {
                        next_iteration,
                        feedback,
                    } => {
                        let reason = feedback.reason_code;
                        next.iteration_count = next_iteration;
                        next.staging_artifacts.feedback = Some(feedback);
                        next.staging_artifacts.raw = None;
                        next.staging_artifacts.validated = None;
                        next.transition_to(JobStatus::Generating)?;

                        let outcome = self.commit(job, next).await?;
                        if matches!(outcome, StepOutcome::Committed(_)) {
                            self.counters.retries.fetch_add(1, Ordering::Relaxed);
                            self.metrics
                                .record_retry(&job.pipeline_kind.to_string(), &reason.to_string());
                            info!(
                                job_id = %job.job_id,
                                iteration = next_iteration,
                                reason = %reason,
                                "Regeneration scheduled"
                            );
                            self.emit(PipelineEvent::retry_scheduled(
                                job.job_id,
                                next_iteration,
                                reason,
                            ))
                            .await;
                        }
                        return Ok(outcome);
                    }
                    RetryDecision::Exhausted {
                        final_iteration,
                        feedback,
                    } => {
                        let error = StageError::new(
                            PipelineStage::ValidateSemantics,
                            ErrorClassification::ExhaustedRetries,
                            format!(
                                "semantic review failed after {} attempts: {}: {}",
                                final_iteration, feedback.reason_code, feedback.detail
                            ),
                        );
                        next.iteration_count = final_iteration;
                        next.staging_artifacts.feedback = Some(feedback);
                        return Ok(StepOutcome::Failed { job: next, error });
                    }
                }
            }

            JobStatus::PostProcessing => {
                let validated = self.validated(job, PipelineStage::PostProcess { branch: 0 })?;
                let keys = job
                    .pipeline_kind
                    .branch_keys()
                    .get(..self.config.branch_count)
                    .ok_or_else(|| {
                        StageError::structural(
                            PipelineStage::PostProcess { branch: 0 },
                            format!(
                                "{} jobs have fewer than {} branches",
                                job.pipeline_kind, self.config.branch_count
                            ),
                        )
                    })?;

                let outputs = fan_out(
                    Arc::clone(&self.branches),
                    job.job_id,
                    Arc::new(job.primary_input.clone()),
                    Arc::new(validated.clone()),
                    keys,
                    self.event_tx.as_ref(),
                )
                .await?;
                next.staging_artifacts.post_process = outputs;
                next.transition_to(JobStatus::Composing)?;
            }

            JobStatus::Composing => {
                let artifact = self.composer.compose(job)?;
                next.staging_artifacts.final_artifact = Some(artifact);
                next.transition_to(JobStatus::Ready)?;
            }

            JobStatus::Ready | JobStatus::Failed => {
                return Ok(StepOutcome::Superseded(job.clone()));
            }
        }

        self.commit(job, next).await
    }

    fn validated<'a>(
        &self,
        job: &'a Job,
        stage: PipelineStage,
    ) -> Result<&'a Candidate, StageError> {
        job.staging_artifacts
            .validated
            .as_ref()
            .ok_or_else(|| StageError::structural(stage, "no validated candidate"))
    }

    /// Persists `next` if the stored job is still at `job.revision`.
    async fn commit(&self, job: &Job, next: Job) -> Result<StepOutcome, StageError> {
        let stage = PipelineStage::for_status(job.status);

        match self.store.put_job_if_revision(&next, job.revision).await {
            Ok(stored) => Ok(StepOutcome::Committed(stored)),
            Err(StoreError::Conflict { .. }) => match self.store.get_job(&job.job_id).await {
                Ok(Some(current)) => Ok(StepOutcome::Superseded(current)),
                Ok(None) => Err(StageError::persistence(stage, "job vanished from the store")),
                Err(e) => Err(StageError::persistence(stage, e.to_string())),
            },
            Err(e) => Err(StageError::persistence(stage, e.to_string())),
        }
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}
