//! Stage executors of the generation workflow.
//!
//! Each executor performs exactly one step and knows nothing about job
//! status or persistence; the orchestrator sequences them.
//!
//! - [`Generator`]: candidate generation (collaborator call)
//! - [`StructureValidator`]: deterministic structural checks and normalization
//! - [`SemanticValidator`]: semantic review (collaborator call)
//! - [`BranchExecutor`]: one post-processing branch (collaborator call)
//! - [`Composer`]: pure merge into the final artifact

pub mod branch;
pub mod compose;
pub mod generate;
pub mod semantics;
pub mod structure;

pub use branch::BranchExecutor;
pub use compose::{artifact_digest, Composer};
pub use generate::Generator;
pub use semantics::SemanticValidator;
pub use structure::{is_hangul_pronunciation, StructureRules, StructureValidator};
