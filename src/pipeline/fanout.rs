//! Parallel post-processing with a fan-in barrier.
//!
//! Every branch runs as its own tokio task. Fan-in waits for all of them,
//! successes and failures alike, before returning, so nothing downstream can
//! observe a partial set of outputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::candidate::{BranchKey, BranchOutput, BranchResult, Candidate};
use super::events::PipelineEvent;
use super::job::{JobId, PipelineStage, PrimaryInput};
use crate::error::StageError;
use crate::metrics::MetricsCollector;
use crate::stages::BranchExecutor;

/// Runs one branch per key concurrently and joins all of them.
///
/// Returns one output per key when every branch succeeds. Otherwise returns
/// the error of the lowest-indexed failing branch, labeled
/// `postProcess:branch{i}` with `i` 1-based. Branches are never retried here.
pub async fn fan_out(
    executor: Arc<BranchExecutor>,
    job_id: JobId,
    input: Arc<PrimaryInput>,
    candidate: Arc<Candidate>,
    keys: &[BranchKey],
    event_tx: Option<&mpsc::Sender<PipelineEvent>>,
) -> Result<BTreeMap<BranchKey, BranchOutput>, StageError> {
    let handles: Vec<_> = keys
        .iter()
        .copied()
        .map(|key| {
            let executor = Arc::clone(&executor);
            let input = Arc::clone(&input);
            let candidate = Arc::clone(&candidate);
            tokio::spawn(async move {
                executor
                    .execute(&job_id, &input, &candidate, key)
                    .await
                    .map(|output| BranchResult {
                        branch_key: key,
                        output,
                    })
            })
        })
        .collect();

    // Barrier: every branch reports before anything is decided.
    let joined = join_all(handles).await;

    let metrics = MetricsCollector::new();
    let mut outputs = BTreeMap::new();
    let mut first_failure: Option<StageError> = None;

    for (idx, (key, joined)) in keys.iter().zip(joined).enumerate() {
        let stage = PipelineStage::PostProcess { branch: idx + 1 };
        let outcome = match joined {
            Ok(result) => result.map_err(|e| e.at(stage)),
            Err(join_err) => Err(StageError::external(
                stage,
                format!("branch task aborted: {}", join_err),
            )),
        };

        metrics.record_branch(&key.to_string(), outcome.is_ok());
        if let Some(tx) = event_tx {
            let _ = tx
                .send(PipelineEvent::branch_completed(job_id, *key, outcome.is_ok()))
                .await;
        }

        match outcome {
            Ok(result) => {
                info!(job_id = %job_id, branch = %result.branch_key, "Branch completed");
                outputs.insert(result.branch_key, result.output);
            }
            Err(err) => {
                error!(job_id = %job_id, branch = %key, error = %err, "Branch failed");
                if first_failure.is_none() {
                    first_failure = Some(err);
                }
            }
        }
    }

    match first_failure {
        Some(err) => Err(err),
        None => Ok(outputs),
    }
}
