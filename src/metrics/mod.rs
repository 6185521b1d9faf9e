//! Prometheus metrics for the generation workflow.
//!
//! ```ignore
//! use content_forge::metrics::{export_metrics, init_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_job("content_activity", "READY");
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, BRANCHES_TOTAL, JOBS_IN_PROGRESS, JOBS_TOTAL, REGISTRY, RETRIES_TOTAL,
    STAGE_DURATION,
};
