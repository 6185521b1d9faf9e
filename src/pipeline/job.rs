//! The persisted job record and its lifecycle.
//!
//! A [`Job`] is the single source of truth for one run of the generation
//! workflow. Every stage transition is written back to the job store before
//! the next stage runs, so any worker can resume a job from its persisted
//! [`JobStatus`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::candidate::{BranchKey, BranchOutput, Candidate, FinalArtifact, ValidationResult};

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh random job id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Pipeline kind and input
// ============================================================================

/// The two concrete instances of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Script pair to learning activities plus narrated audio.
    ContentActivity,
    /// Media request to character scenes plus rendered media.
    VideoFactory,
}

impl PipelineKind {
    /// Branch keys run during post-processing for this kind, in branch order.
    pub fn branch_keys(&self) -> &'static [BranchKey] {
        match self {
            PipelineKind::ContentActivity => {
                &[BranchKey::ScriptNarration, BranchKey::ResponseNarration]
            }
            PipelineKind::VideoFactory => &[BranchKey::ReferenceImage, BranchKey::SceneRender],
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineKind::ContentActivity => write!(f, "content_activity"),
            PipelineKind::VideoFactory => write!(f, "video_factory"),
        }
    }
}

/// The immutable request a job was created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrimaryInput {
    /// A target-language sentence with its native-language translation.
    Script {
        /// Sentence in the language being learned.
        lang_script: String,
        /// Korean translation of `lang_script`.
        ko_script: String,
        /// Language code of `lang_script` (e.g. "jp").
        language: String,
    },
    /// A request for a batch of short character scenes.
    VideoRequest {
        /// Media genre the quotes are drawn from (e.g. "anime", "drama").
        media_type: String,
        /// Language of the dialogue.
        language: String,
        /// Number of scenes to generate.
        count: u32,
        /// Free-form topic; derived from the media type when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        /// Requesting user, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
}

/// Largest scene batch a video request may ask for.
pub const MAX_VIDEO_COUNT: u32 = 1000;

/// Error returned when a primary input is not acceptable for submission.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid input field '{field}': {message}")]
pub struct InputError {
    pub field: &'static str,
    pub message: String,
}

impl PrimaryInput {
    /// Returns the pipeline kind this input drives.
    pub fn kind(&self) -> PipelineKind {
        match self {
            PrimaryInput::Script { .. } => PipelineKind::ContentActivity,
            PrimaryInput::VideoRequest { .. } => PipelineKind::VideoFactory,
        }
    }

    /// Returns the language code of the input.
    pub fn language(&self) -> &str {
        match self {
            PrimaryInput::Script { language, .. } | PrimaryInput::VideoRequest { language, .. } => {
                language
            }
        }
    }

    /// Source text a sentence reconstruction must reproduce exactly.
    pub fn source_text(&self) -> Option<&str> {
        match self {
            PrimaryInput::Script { lang_script, .. } => Some(lang_script),
            PrimaryInput::VideoRequest { .. } => None,
        }
    }

    /// Topic for a video request, falling back to a genre-derived topic.
    pub fn topic(&self) -> Option<String> {
        match self {
            PrimaryInput::VideoRequest {
                topic: Some(topic), ..
            } if !topic.trim().is_empty() => Some(topic.clone()),
            PrimaryInput::VideoRequest { media_type, .. } => {
                Some(format!("{} 장르 명대사 생성", media_type))
            }
            PrimaryInput::Script { .. } => None,
        }
    }

    /// Checks the input before a job is created for it.
    pub fn validate(&self) -> Result<(), InputError> {
        fn require(field: &'static str, value: &str) -> Result<(), InputError> {
            if value.trim().is_empty() {
                return Err(InputError {
                    field,
                    message: "must not be empty".to_string(),
                });
            }
            Ok(())
        }

        match self {
            PrimaryInput::Script {
                lang_script,
                ko_script,
                language,
            } => {
                require("lang_script", lang_script)?;
                require("ko_script", ko_script)?;
                require("language", language)
            }
            PrimaryInput::VideoRequest {
                media_type,
                language,
                count,
                ..
            } => {
                require("media_type", media_type)?;
                require("language", language)?;
                if *count == 0 || *count > MAX_VIDEO_COUNT {
                    return Err(InputError {
                        field: "count",
                        message: format!("must be between 1 and {}", MAX_VIDEO_COUNT),
                    });
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Persisted lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Generating,
    Validating,
    SemanticReview,
    PostProcessing,
    Composing,
    Ready,
    Failed,
}

impl JobStatus {
    /// Returns true for `Ready` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Failed)
    }

    /// Returns true if moving from `self` to `next` is a legal edge.
    ///
    /// The only backward edge is `SemanticReview -> Generating`; whether it may
    /// still be taken is decided by the retry controller, not here.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Ready | Failed, _) => false,
            (_, Failed) => true,
            (Pending, Generating)
            | (Generating, Validating)
            | (Validating, SemanticReview)
            | (SemanticReview, PostProcessing)
            | (SemanticReview, Generating)
            | (PostProcessing, Composing)
            | (Composing, Ready) => true,
            _ => false,
        }
    }

    /// Stable string form used by the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Generating => "GENERATING",
            JobStatus::Validating => "VALIDATING",
            JobStatus::SemanticReview => "SEMANTIC_REVIEW",
            JobStatus::PostProcessing => "POST_PROCESSING",
            JobStatus::Composing => "COMPOSING",
            JobStatus::Ready => "READY",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a status change is not a legal edge.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid status transition from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

// ============================================================================
// Stages and errors
// ============================================================================

/// Workflow stage, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Dispatch,
    Generate,
    ValidateStructure,
    ValidateSemantics,
    /// One post-processing branch, 1-based.
    PostProcess { branch: usize },
    Compose,
}

impl PipelineStage {
    /// Stage that runs while a job sits in `status`.
    pub fn for_status(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => PipelineStage::Dispatch,
            JobStatus::Generating => PipelineStage::Generate,
            JobStatus::Validating => PipelineStage::ValidateStructure,
            JobStatus::SemanticReview => PipelineStage::ValidateSemantics,
            JobStatus::PostProcessing => PipelineStage::PostProcess { branch: 0 },
            JobStatus::Composing | JobStatus::Ready | JobStatus::Failed => PipelineStage::Compose,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Dispatch => write!(f, "dispatch"),
            PipelineStage::Generate => write!(f, "generate"),
            PipelineStage::ValidateStructure => write!(f, "validateStructure"),
            PipelineStage::ValidateSemantics => write!(f, "validateSemantics"),
            PipelineStage::PostProcess { branch: 0 } => write!(f, "postProcess"),
            PipelineStage::PostProcess { branch } => write!(f, "postProcess:branch{}", branch),
            PipelineStage::Compose => write!(f, "compose"),
        }
    }
}

/// Classification of a job failure. The orchestrator only ever branches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClassification {
    /// Candidate failed deterministic structural checks.
    StructuralError,
    /// Semantic review failed; recoverable while iterations remain.
    SemanticQaFailure,
    /// Semantic review kept failing until the iteration bound was reached.
    ExhaustedRetries,
    /// A collaborator call failed, timed out, or returned garbage.
    ExternalServiceError,
    /// Compose found fewer branch outputs than branches.
    IncompleteComposition,
    /// The job store rejected a write.
    PersistenceError,
}

impl ErrorClassification {
    /// Returns true if the failure can be retried inside the pipeline.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ErrorClassification::SemanticQaFailure)
    }
}

impl fmt::Display for ErrorClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClassification::StructuralError => "StructuralError",
            ErrorClassification::SemanticQaFailure => "SemanticQaFailure",
            ErrorClassification::ExhaustedRetries => "ExhaustedRetries",
            ErrorClassification::ExternalServiceError => "ExternalServiceError",
            ErrorClassification::IncompleteComposition => "IncompleteComposition",
            ErrorClassification::PersistenceError => "PersistenceError",
        };
        f.write_str(name)
    }
}

/// Failure details written onto a `Failed` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub classification: ErrorClassification,
    /// Normalized, length-bounded message.
    pub detail: String,
    pub failed_stage: String,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// Staging
// ============================================================================

/// Intermediate outputs accumulated as the job moves through the stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingArtifacts {
    /// Last candidate produced by Generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Candidate>,
    /// Candidate after structural validation and normalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<Candidate>,
    /// Last semantic failure, fed back to the next Generate attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<ValidationResult>,
    /// One output per post-processing branch.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub post_process: std::collections::BTreeMap<BranchKey, BranchOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_artifact: Option<FinalArtifact>,
}

impl StagingArtifacts {
    /// Names of the stages that currently have staged output.
    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.raw.is_some() {
            keys.push("generate");
        }
        if self.validated.is_some() {
            keys.push("validated");
        }
        if self.feedback.is_some() {
            keys.push("feedback");
        }
        if !self.post_process.is_empty() {
            keys.push("postProcess");
        }
        if self.final_artifact.is_some() {
            keys.push("final");
        }
        keys
    }
}

// ============================================================================
// Job
// ============================================================================

/// One run of the generation workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub pipeline_kind: PipelineKind,
    pub primary_input: PrimaryInput,
    pub status: JobStatus,
    pub iteration_count: u32,
    #[serde(default)]
    pub staging_artifacts: StagingArtifacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_record: Option<ErrorRecord>,
    /// Write counter; every persisted transition bumps it by one.
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new `Pending` job for the given input.
    pub fn new(primary_input: PrimaryInput) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::new(),
            pipeline_kind: primary_input.kind(),
            primary_input,
            status: JobStatus::Pending,
            iteration_count: 0,
            staging_artifacts: StagingArtifacts::default(),
            error_record: None,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets a specific job id.
    pub fn with_id(mut self, job_id: JobId) -> Self {
        self.job_id = job_id;
        self
    }

    /// Returns true if the job is `Ready` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the job to `next`, refusing illegal edges.
    pub fn transition_to(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Returns the final artifact, once the job is `Ready`.
    pub fn final_artifact(&self) -> Option<&FinalArtifact> {
        self.staging_artifacts.final_artifact.as_ref()
    }
}
