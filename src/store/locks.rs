//! Per-account locks
//!
//! Every balance mutation holds the lock of each account it touches for
//! its whole read-modify-write. Locks are created on first use and shared
//! by the HTTP path and the worker pool.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::UserId;

/// Held lock(s) on one or two accounts; released on drop
#[derive(Debug)]
pub struct AccountGuard {
    _first: OwnedMutexGuard<()>,
    _second: Option<OwnedMutexGuard<()>>,
}

#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, user_id: UserId) -> Arc<Mutex<()>> {
        // The map shard guard is dropped before anything awaits
        self.locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    pub async fn lock(&self, user_id: UserId) -> AccountGuard {
        let first = self.handle(user_id).lock_owned().await;
        AccountGuard {
            _first: first,
            _second: None,
        }
    }

    /// Lock two accounts, always in ascending id order.
    ///
    /// Equal ids take a single lock.
    pub async fn lock_pair(&self, a: UserId, b: UserId) -> AccountGuard {
        if a == b {
            return self.lock(a).await;
        }

        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let first = self.handle(low).lock_owned().await;
        let second = self.handle(high).lock_owned().await;

        AccountGuard {
            _first: first,
            _second: Some(second),
        }
    }

    /// Number of accounts that have been locked at least once
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
