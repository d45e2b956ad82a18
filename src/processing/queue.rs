//! Bounded job queue
//!
//! A tokio mpsc channel shared by every worker. Submission never waits: a
//! full buffer is reported to the caller straight away.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, AppResult};

use super::Job;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Producer half, cloned into the gateway
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    closed: CancellationToken,
}

/// Consumer half, shared by the workers
#[derive(Debug, Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    closed: CancellationToken,
}

/// Create a queue holding at most `capacity` pending jobs
pub fn bounded(capacity: usize) -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let closed = CancellationToken::new();

    (
        JobQueue {
            tx,
            closed: closed.clone(),
        },
        JobReceiver {
            rx: Arc::new(Mutex::new(rx)),
            closed,
        },
    )
}

impl JobQueue {
    pub fn submit(&self, job: Job) -> AppResult<()> {
        if self.closed.is_cancelled() {
            return Err(AppError::ShuttingDown);
        }

        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => {
                tracing::warn!(
                    job_id = %job.id,
                    user_id = job.user_id,
                    capacity = self.capacity(),
                    "Job queue full, rejecting submission"
                );
                AppError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => AppError::ShuttingDown,
        })
    }

    /// Stop accepting jobs; already buffered jobs stay receivable
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Jobs currently buffered
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl JobReceiver {
    /// Wait for the next job.
    ///
    /// Returns `None` once the queue is closed and every buffered job has
    /// been handed out.
    pub async fn recv(&self) -> Option<Job> {
        let mut rx = self.rx.lock().await;

        tokio::select! {
            biased;
            job = rx.recv() => job,
            _ = self.closed.cancelled() => {
                rx.close();
                rx.recv().await
            }
        }
    }

    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }
}
