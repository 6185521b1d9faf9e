//! Job scheduling: a queue of job events drained by a pool of workers.
//!
//! - **Dispatcher**: admits pending jobs and recovers active ones after a restart
//! - **WorkerPool**: workers that advance one stage per event
//!
//! # Architecture
//!
//! ```text
//!        ┌────────────┐
//!        │ Dispatcher │  trigger(pending) / recover()
//!        └─────┬──────┘
//!              │ JobEvent { job_id }
//!        ┌─────▼──────┐
//!        │ mpsc queue │◄──────────────┐
//!        └─────┬──────┘               │ still running
//!     ┌────────┼────────┐             │
//!     ▼        ▼        ▼             │
//! ┌────────┐┌────────┐┌────────┐      │
//! │Worker 1││Worker 2││Worker N│──────┘
//! └────────┘└────────┘└────────┘
//!   advance(job) with a conditional write per stage
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use content_forge::scheduler::{job_channel, Dispatcher, WorkerPool, WorkerPoolConfig};
//!
//! let (tx, rx) = job_channel();
//! let dispatcher = Dispatcher::new(store.clone(), tx.clone());
//! let mut pool = WorkerPool::new(WorkerPoolConfig::new(4), orchestrator, rx, tx);
//! pool.start()?;
//! dispatcher.recover().await?;
//! ```

pub mod dispatcher;
pub mod worker_pool;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::pipeline::JobId;

pub use dispatcher::{DispatchError, Dispatcher};
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};

/// Notification that a job may have a stage to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
}

impl JobEvent {
    pub fn new(job_id: JobId) -> Self {
        Self { job_id }
    }
}

/// Creates the queue shared by a dispatcher and a worker pool.
pub fn job_channel() -> (
    mpsc::UnboundedSender<JobEvent>,
    mpsc::UnboundedReceiver<JobEvent>,
) {
    mpsc::unbounded_channel()
}
