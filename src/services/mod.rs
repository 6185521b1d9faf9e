//! External collaborators of the workflow.
//!
//! Stage executors never talk to an LLM or a media backend directly; they go
//! through these traits, which are injected into the orchestrator at
//! construction time. Implementations shipped with the crate:
//!
//! - [`LlmGenerationService`]: candidate generation over an [`LlmProvider`]
//! - [`LlmJudgeService`]: semantic review over an [`LlmProvider`]
//! - [`HttpSynthesisClient`]: speech and media synthesis over HTTP
//!
//! [`LlmProvider`]: crate::llm::LlmProvider

pub mod http_synthesis;
pub mod llm_generation;
pub mod llm_judge;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::pipeline::candidate::{BranchKey, Candidate, ValidationResult};
use crate::pipeline::job::PrimaryInput;

pub use http_synthesis::HttpSynthesisClient;
pub use llm_generation::LlmGenerationService;
pub use llm_judge::{parse_verdict, LlmJudgeService};

/// Produces candidates from a primary input.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generates a candidate. `feedback` carries the last semantic failure on retries.
    async fn generate(
        &self,
        input: &PrimaryInput,
        feedback: Option<&ValidationResult>,
    ) -> Result<Candidate, ServiceError>;
}

/// Reviews a structurally valid candidate for meaning-level defects.
#[async_trait]
pub trait JudgeService: Send + Sync {
    async fn judge(
        &self,
        input: &PrimaryInput,
        candidate: &Candidate,
    ) -> Result<ValidationResult, ServiceError>;
}

/// A single synthesis job: render `text` and store it under `target_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub branch_key: BranchKey,
    pub text: String,
    /// Storage key the asset must be written to.
    pub target_key: String,
    pub language: String,
}

/// A stored asset produced by synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedAsset {
    pub key: String,
}

/// Renders audio or media assets.
#[async_trait]
pub trait SynthesisService: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesizedAsset, ServiceError>;
}
