//! Transaction processing
//!
//! Deposits and withdrawals are queued and applied by a worker pool;
//! transfers and debits run inline. [`TransactionGateway`] is the single
//! entry point for both paths.

pub mod gateway;
pub mod job;
pub mod queue;
pub mod service;
pub mod worker;

pub use gateway::{Page, TransactionGateway};
pub use job::{Job, Operation};
pub use queue::{JobQueue, JobReceiver};
pub use service::LedgerService;
pub use worker::{PoolStats, WorkerPool, WorkerPoolConfig};
