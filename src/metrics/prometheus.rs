//! Prometheus metrics registration and export.
//!
//! Defines the metrics recorded by the workflow and exposes functions for
//! initializing and exporting them.

use prometheus::{CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all content_forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Jobs that reached a terminal status, labeled by pipeline kind and status.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Stage execution duration in seconds, labeled by stage and outcome.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Regeneration rounds scheduled, labeled by pipeline kind and reason code.
pub static RETRIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Post-processing branch completions, labeled by branch and status.
pub static BRANCHES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of jobs currently being advanced.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of active workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once is harmless: later calls keep the metrics
/// registered by the first one.
///
/// # Errors
///
/// Returns a `prometheus::Error` if a metric cannot be created or registered.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let jobs_total = CounterVec::new(
        Opts::new(
            "content_forge_jobs_total",
            "Jobs that reached a terminal status",
        ),
        &["kind", "status"],
    )?;

    let stage_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "content_forge_stage_duration_seconds",
            "Stage execution duration in seconds",
        )
        .buckets(vec![0.05, 0.25, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["stage", "outcome"],
    )?;

    let retries_total = CounterVec::new(
        Opts::new(
            "content_forge_retries_total",
            "Regeneration rounds scheduled after a failed semantic review",
        ),
        &["kind", "reason"],
    )?;

    let branches_total = CounterVec::new(
        Opts::new(
            "content_forge_branches_total",
            "Post-processing branch completions",
        ),
        &["branch", "status"],
    )?;

    let jobs_in_progress = Gauge::new(
        "content_forge_jobs_in_progress",
        "Number of jobs currently being advanced",
    )?;

    let active_workers = Gauge::new("content_forge_active_workers", "Number of active workers")?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;
    registry.register(Box::new(retries_total.clone()))?;
    registry.register(Box::new(branches_total.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = STAGE_DURATION.set(stage_duration);
    let _ = RETRIES_TOTAL.set(retries_total);
    let _ = BRANCHES_TOTAL.set(branches_total);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        let first = init_metrics();
        assert!(first.is_ok() || REGISTRY.get().is_some());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_export_after_recording() {
        let _ = init_metrics();
        if let Some(jobs) = JOBS_TOTAL.get() {
            jobs.with_label_values(&["content_activity", "READY"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("content_forge_jobs_total"));
    }
}
