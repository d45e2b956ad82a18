//! Worker pool
//!
//! A fixed set of tokio tasks draining the job queue. A failed job is logged
//! and dropped; only closing the queue stops a worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use super::queue::{self, JobQueue, JobReceiver, DEFAULT_QUEUE_CAPACITY};
use super::LedgerService;

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of concurrent workers (default: 10)
    pub worker_count: usize,
    /// Queue capacity (default: 100)
    pub queue_capacity: usize,
    /// Pause after each job (default: 1 second, zero disables)
    pub job_delay: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            job_delay: Duration::from_secs(1),
        }
    }
}

impl From<&crate::Config> for WorkerPoolConfig {
    fn from(config: &crate::Config) -> Self {
        Self {
            worker_count: config.worker_count,
            queue_capacity: config.job_queue_capacity,
            job_delay: config.worker_job_delay,
        }
    }
}

/// Snapshot of the pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolStats {
        PoolStats {
            processed: self.processed.load(Ordering::Acquire),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct WorkerPool {
    queue: JobQueue,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Create the queue and spawn the workers
    pub fn start(config: WorkerPoolConfig, ledger: Arc<LedgerService>) -> Self {
        let (queue, receiver) = queue::bounded(config.queue_capacity);
        let counters = Arc::new(Counters::default());

        let workers = (1..=config.worker_count)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    jobs: receiver.clone(),
                    ledger: ledger.clone(),
                    counters: counters.clone(),
                    delay: config.job_delay,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::info!(
            workers = config.worker_count,
            queue_capacity = config.queue_capacity,
            job_delay_ms = config.job_delay.as_millis() as u64,
            "Worker pool started"
        );

        Self {
            queue,
            workers,
            counters,
        }
    }

    /// Producer handle for submitting jobs
    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    /// Close the queue, let the workers finish every buffered job, then join them
    pub async fn shutdown(self) -> PoolStats {
        tracing::info!(pending = self.queue.len(), "Draining worker pool...");
        self.queue.close();

        for handle in self.workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }

        let stats = self.counters.snapshot();
        tracing::info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Worker pool stopped"
        );
        stats
    }
}

struct Worker {
    id: usize,
    jobs: JobReceiver,
    ledger: Arc<LedgerService>,
    counters: Arc<Counters>,
    delay: Duration,
}

impl Worker {
    async fn run(self) {
        tracing::debug!(worker_id = self.id, "Worker started");

        while let Some(job) = self.jobs.recv().await {
            let result = self
                .ledger
                .execute(job.user_id, job.operation, job.amount)
                .await;

            match result {
                Ok(record) => {
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(
                        worker_id = self.id,
                        job_id = %job.id,
                        transaction_id = record.id,
                        user_id = job.user_id,
                        transaction_type = %job.transaction_type(),
                        amount = %job.amount,
                        "Job processed"
                    );
                }
                Err(e) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        worker_id = self.id,
                        job_id = %job.id,
                        user_id = job.user_id,
                        to_user_id = ?job.operation.to_user_id(),
                        transaction_type = %job.transaction_type(),
                        amount = %job.amount,
                        queued_ms = (chrono::Utc::now() - job.submitted_at).num_milliseconds(),
                        error = %e,
                        "Job failed, dropping"
                    );
                }
            }
            self.counters.processed.fetch_add(1, Ordering::Release);

            if !self.delay.is_zero() {
                // Shutdown cuts the pause short
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = self.jobs.closed().cancelled() => {}
                }
            }
        }

        tracing::debug!(worker_id = self.id, "Worker stopped");
    }
}
