//! content-forge: generation workflow for language-learning content.
//!
//! Jobs move through Generate, structural and semantic validation (with a
//! bounded retry loop), parallel post-processing and composition. Every
//! transition is persisted, so a job can be resumed after a crash.

pub mod cli;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod services;
pub mod stages;
pub mod storage;
pub mod utils;

// Re-export commonly used error types
pub use error::{LlmError, PersistenceFailure, ServiceError, StageError, StoreError};
pub use pipeline::{Job, JobId, JobStatus, Orchestrator, PipelineConfig, PrimaryInput};
