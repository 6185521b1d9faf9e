//! Worker pool draining the job event queue.
//!
//! Each worker takes one [`JobEvent`] at a time, loads the job, advances it by
//! one stage and puts the job id back on the queue when the job is still
//! running. Workers hold no job state between events, so any worker can pick
//! up any job.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::JobEvent;
use crate::metrics::MetricsCollector;
use crate::pipeline::{AdvanceOutcome, JobStatus, Orchestrator};

/// Delay before an event whose job could not be loaded is queued again.
pub const LOAD_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// The pool was configured without workers.
    #[error("Worker pool needs at least one worker")]
    NoWorkers,
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently advancing a job.
    pub active_workers: usize,
    /// Events handled, including skipped ones.
    pub events_processed: u64,
    /// Jobs this pool moved to `Ready`.
    pub jobs_ready: u64,
    /// Jobs this pool moved to `Failed`.
    pub jobs_failed: u64,
    /// Advances that escaped with a persistence failure.
    pub persistence_failures: u64,
    /// Events put back on the queue because the job could not be loaded.
    pub load_retries: u64,
    /// Average duration of one advance.
    pub average_advance_duration: Duration,
}

impl PoolStats {
    /// Returns the number of jobs that reached a terminal status.
    pub fn total_finished(&self) -> u64 {
        self.jobs_ready + self.jobs_failed
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    events_processed: AtomicU64,
    jobs_ready: AtomicU64,
    jobs_failed: AtomicU64,
    persistence_failures: AtomicU64,
    load_retries: AtomicU64,
    advances: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            events_processed: AtomicU64::new(0),
            jobs_ready: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            load_retries: AtomicU64::new(0),
            advances: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_advance(&self, duration: Duration) {
        self.advances.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let advances = self.advances.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let average_duration = if advances > 0 {
            Duration::from_millis(total_duration_ms / advances)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            events_processed: self.events_processed.load(Ordering::SeqCst),
            jobs_ready: self.jobs_ready.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            persistence_failures: self.persistence_failures.load(Ordering::SeqCst),
            load_retries: self.load_retries.load(Ordering::SeqCst),
            average_advance_duration: average_duration,
        }
    }
}

/// Worker pool that advances jobs from a shared event queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    orchestrator: Arc<Orchestrator>,
    events: Arc<Mutex<mpsc::UnboundedReceiver<JobEvent>>>,
    requeue: mpsc::UnboundedSender<JobEvent>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a pool reading from `events`.
    ///
    /// `requeue` must feed the same queue; it is used to hand a job that is
    /// still running back to the pool.
    pub fn new(
        config: WorkerPoolConfig,
        orchestrator: Arc<Orchestrator>,
        events: mpsc::UnboundedReceiver<JobEvent>,
        requeue: mpsc::UnboundedSender<JobEvent>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            orchestrator,
            events: Arc::new(Mutex::new(events)),
            requeue,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }
        if self.config.num_workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                events: Arc::clone(&self.events),
                requeue: self.requeue.clone(),
                orchestrator: Arc::clone(&self.orchestrator),
                shutdown_rx: self.shutdown_tx.subscribe(),
                stats: Arc::clone(&self.stats),
            };

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        MetricsCollector::new().update_workers(self.config.num_workers);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Workers finish the advance they are running before they stop.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Workers may have already stopped.
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);
        MetricsCollector::new().update_workers(0);

        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}

/// A single worker advancing jobs from the queue.
struct Worker {
    id: String,
    events: Arc<Mutex<mpsc::UnboundedReceiver<JobEvent>>>,
    requeue: mpsc::UnboundedSender<JobEvent>,
    orchestrator: Arc<Orchestrator>,
    shutdown_rx: broadcast::Receiver<()>,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    /// Main worker loop; runs until shutdown or until the queue closes.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");
        let events = Arc::clone(&self.events);

        loop {
            let event = tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                event = async { events.lock().await.recv().await } => event,
            };

            match event {
                Some(event) => self.process(event).await,
                None => {
                    debug!(worker_id = %self.id, "Job queue closed");
                    break;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    async fn process(&self, event: JobEvent) {
        self.stats.events_processed.fetch_add(1, Ordering::SeqCst);

        let job = match self.orchestrator.store().get_job(&event.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(worker_id = %self.id, job_id = %event.job_id, "Event for unknown job");
                return;
            }
            Err(e) => {
                error!(worker_id = %self.id, job_id = %event.job_id, error = %e, "Failed to load job");
                self.stats.load_retries.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(LOAD_RETRY_BACKOFF).await;
                if let Err(unsent) = self.requeue.send(event) {
                    warn!(worker_id = %self.id, job_id = %unsent.0.job_id, "Queue closed, job left in place");
                }
                return;
            }
        };

        if job.is_terminal() {
            debug!(worker_id = %self.id, job_id = %job.job_id, "Skipping terminal job");
            return;
        }

        let metrics = MetricsCollector::new();
        let in_progress = self.stats.active_workers.fetch_add(1, Ordering::SeqCst) + 1;
        metrics.update_jobs_in_progress(in_progress as usize);
        let started = Instant::now();
        let outcome = self.orchestrator.advance_outcome(&job).await;
        self.stats.record_advance(started.elapsed());
        let in_progress = self.stats.active_workers.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics.update_jobs_in_progress(in_progress as usize);

        match outcome {
            Ok(AdvanceOutcome::Moved(next)) => match next.status {
                JobStatus::Ready => {
                    self.stats.jobs_ready.fetch_add(1, Ordering::SeqCst);
                }
                JobStatus::Failed => {
                    self.stats.jobs_failed.fetch_add(1, Ordering::SeqCst);
                }
                _ => {
                    if self.requeue.send(JobEvent::new(next.job_id)).is_err() {
                        warn!(worker_id = %self.id, job_id = %next.job_id, "Queue closed, job left in place");
                    }
                }
            },
            Ok(AdvanceOutcome::Superseded(current)) => {
                debug!(
                    worker_id = %self.id,
                    job_id = %current.job_id,
                    status = %current.status,
                    "Another worker owns this step"
                );
            }
            Ok(AdvanceOutcome::Unchanged(_)) => {}
            Err(failure) => {
                self.stats
                    .persistence_failures
                    .fetch_add(1, Ordering::SeqCst);
                error!(
                    worker_id = %self.id,
                    job_id = %failure.job_id,
                    error = %failure,
                    "Job failure could not be recorded"
                );
            }
        }
    }
}
