//! Recording helpers for workflow metrics.
//!
//! `MetricsCollector` wraps the raw Prometheus statics so call sites use
//! consistent labels. Every method is a no-op until `init_metrics()` ran.

use super::prometheus::{
    ACTIVE_WORKERS, BRANCHES_TOTAL, JOBS_IN_PROGRESS, JOBS_TOTAL, RETRIES_TOTAL, STAGE_DURATION,
};

/// Metrics collector for workflow operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one stage execution.
    ///
    /// `outcome` is one of `committed`, `superseded` or `failed`.
    pub fn record_stage(&self, stage: &str, outcome: &str, duration_secs: f64) {
        if let Some(stage_duration) = STAGE_DURATION.get() {
            stage_duration
                .with_label_values(&[stage, outcome])
                .observe(duration_secs);
        }

        tracing::trace!(
            stage = stage,
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded stage metric"
        );
    }

    /// Record a job reaching a terminal status.
    pub fn record_job(&self, kind: &str, status: &str) {
        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&[kind, status]).inc();
        }

        tracing::trace!(kind = kind, status = status, "Recorded job metric");
    }

    /// Record a scheduled regeneration round.
    pub fn record_retry(&self, kind: &str, reason: &str) {
        if let Some(retries_total) = RETRIES_TOTAL.get() {
            retries_total.with_label_values(&[kind, reason]).inc();
        }

        tracing::trace!(kind = kind, reason = reason, "Recorded retry metric");
    }

    /// Record the completion of one post-processing branch.
    pub fn record_branch(&self, branch: &str, success: bool) {
        let status = if success { "success" } else { "failure" };

        if let Some(branches_total) = BRANCHES_TOTAL.get() {
            branches_total.with_label_values(&[branch, status]).inc();
        }

        tracing::trace!(branch = branch, status = status, "Recorded branch metric");
    }

    pub fn update_workers(&self, count: usize) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.set(count as f64);
        }

        tracing::trace!(count = count, "Updated active workers metric");
    }

    /// Set the number of jobs workers are advancing right now.
    pub fn update_jobs_in_progress(&self, count: usize) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.set(count as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::prometheus::{export_metrics, init_metrics};
    use super::*;

    #[test]
    fn test_collector_records_without_init() {
        // Must not panic whether or not another test initialized metrics.
        let collector = MetricsCollector::new();
        collector.record_stage("generate", "committed", 0.1);
        collector.record_branch("script_narration", false);
        collector.update_workers(2);
        collector.update_jobs_in_progress(1);
    }

    #[test]
    fn test_jobs_in_progress_is_exported() {
        init_metrics().unwrap();
        MetricsCollector::new().update_jobs_in_progress(3);
        assert!(export_metrics().contains("content_forge_jobs_in_progress"));
    }

    #[test]
    fn test_recorded_labels_are_exported() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();
        collector.record_retry("video_factory", "TIP_LEAK");
        collector.record_stage("compose", "committed", 0.01);

        let exported = export_metrics();
        assert!(exported.contains("content_forge_retries_total"));
        assert!(exported.contains("reason=\"TIP_LEAK\""));
        assert!(exported.contains("stage=\"compose\""));
    }
}
