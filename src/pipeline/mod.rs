//! The generation workflow: job model, stage sequencing and failure routing.
//!
//! # Architecture
//!
//! - **Orchestrator**: advances a persisted job one stage at a time
//! - **RetryController**: bounds the Generate / validate loop
//! - **fan_out**: runs the post-processing branches in parallel and joins them
//! - **ErrorHandler**: the single path that moves a job to `Failed`
//! - **Config**: limits and rule parameters, loaded from the environment
//!
//! # Flow
//!
//! 1. **Generate**: a collaborator produces a candidate
//! 2. **ValidateStructure**: deterministic checks and normalization
//! 3. **ValidateSemantics**: a judge reviews the candidate; failures loop back
//!    to Generate with feedback until the iteration bound is reached
//! 4. **PostProcess**: one branch per asset kind, all awaited together
//! 5. **Compose**: validated candidate and branch outputs merged into the
//!    final artifact
//!
//! # Example
//!
//! ```rust,ignore
//! use content_forge::pipeline::{Orchestrator, PipelineConfig, PrimaryInput};
//!
//! let orchestrator = Orchestrator::new(config, store, generation, judge, synthesis)?;
//! let job = orchestrator
//!     .submit(PrimaryInput::Script {
//!         lang_script: "今日は暑いですね".to_string(),
//!         ko_script: "오늘은 덥네요".to_string(),
//!         language: "jp".to_string(),
//!     })
//!     .await?;
//! let done = orchestrator.run_to_completion(job).await?;
//! println!("{} -> {}", done.job_id, done.status);
//! ```

pub mod candidate;
pub mod config;
pub mod error_handler;
pub mod events;
pub mod fanout;
pub mod job;
pub mod orchestrator;
pub mod retry;

pub use candidate::{
    ActivityEntry, BranchKey, BranchOutput, BranchResult, Candidate, FinalArtifact,
    LearningActivity, ReasonCode, Scene, ValidationResult,
};
pub use config::{ConfigError, PipelineConfig};
pub use error_handler::{format_error_detail, ErrorHandler};
pub use events::PipelineEvent;
pub use fanout::fan_out;
pub use job::{
    ErrorClassification, ErrorRecord, InputError, Job, JobId, JobStatus, PipelineKind,
    PipelineStage, PrimaryInput, StagingArtifacts,
};
pub use orchestrator::{AdvanceOutcome, Orchestrator, OrchestratorError, OrchestratorStats};
pub use retry::{RetryController, RetryDecision};
