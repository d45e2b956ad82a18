//! Read cache
//!
//! JSON values under `"<prefix>:<identifier>"` keys with a TTL. The cache is
//! optional and strictly best effort: failures are logged and reads fall
//! through to storage. Every backend call is bounded by a deadline so an
//! unresponsive backend cannot hold up a ledger write.
//!
//! Paged reads are guarded by per-scope generations. A write bumps the
//! generation before deleting pages; a reader that started before the bump
//! never leaves its page behind.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::UserId;

pub mod memory;
pub mod redis_cache;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

pub const USER_HISTORY_TTL: Duration = Duration::from_secs(2 * 60);
pub const TRANSACTION_TTL: Duration = Duration::from_secs(5 * 60);
pub const ALL_TRANSACTIONS_TTL: Duration = Duration::from_secs(60);

/// Deadline for a single backend call
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Raw string key-value store with expiry
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key matching a `*` glob; returns how many were removed
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;
}

pub fn key(prefix: &str, identifier: impl std::fmt::Display) -> String {
    format!("{prefix}:{identifier}")
}

pub fn user_history_key(user_id: UserId, limit: i64, offset: i64) -> String {
    key("transactions:user", format_args!("{user_id}:{limit}:{offset}"))
}

pub fn transaction_key(id: i64) -> String {
    key("transaction", id)
}

pub fn all_transactions_key(limit: i64, offset: i64) -> String {
    key("transactions:all", format_args!("{limit}:{offset}"))
}

/// The set of pages a write can make stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageScope {
    User(UserId),
    All,
}

#[derive(Debug, Default)]
struct Generations {
    users: DashMap<UserId, u64>,
    all: AtomicU64,
}

impl Generations {
    fn current(&self, scope: PageScope) -> u64 {
        match scope {
            PageScope::User(user_id) => self.users.get(&user_id).map(|g| *g).unwrap_or(0),
            PageScope::All => self.all.load(Ordering::Acquire),
        }
    }

    fn bump(&self, user_id: UserId) {
        *self.users.entry(user_id).or_insert(0) += 1;
        self.all.fetch_add(1, Ordering::AcqRel);
    }
}

/// Typed front for a [`Cache`] backend
#[derive(Clone)]
pub struct CacheService {
    backend: Arc<dyn Cache>,
    timeout: Duration,
    generations: Arc<Generations>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CacheService {
    pub fn new(backend: Arc<dyn Cache>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_OPERATION_TIMEOUT,
            generations: Arc::new(Generations::default()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    /// A miss, an unreachable backend and an undecodable value all read as `None`
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.bounded(self.backend.get(key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let result = match serde_json::to_string(value) {
            Ok(raw) => self.bounded(self.backend.set(key, raw, ttl)).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            tracing::error!(key = %key, error = %e, "Failed to cache value");
        }
    }

    /// Generation of `scope`; read it before fetching a page from storage
    pub fn generation(&self, scope: PageScope) -> u64 {
        self.generations.current(scope)
    }

    /// Cache a page read at generation `seen`, unless a write has happened since
    pub async fn set_page<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        scope: PageScope,
        seen: u64,
    ) {
        if self.generation(scope) != seen {
            tracing::debug!(key = %key, "Page went stale while loading, not caching");
            return;
        }

        self.set_json(key, value, ttl).await;

        // A write that landed during the set may have missed this key
        if self.generation(scope) != seen {
            if let Err(e) = self.bounded(self.backend.delete(key)).await {
                tracing::error!(key = %key, error = %e, "Failed to drop stale page");
            }
        }
    }

    /// Drop every cached page that could contain a new record for `user_id`
    pub async fn invalidate_user(&self, user_id: UserId) {
        self.generations.bump(user_id);

        let user_pattern = format!("transactions:user:{user_id}:*");

        for pattern in [user_pattern.as_str(), "transactions:all:*"] {
            if let Err(e) = self.bounded(self.backend.delete_pattern(pattern)).await {
                tracing::error!(pattern = %pattern, error = %e, "Cache invalidation failed");
            }
        }

        tracing::debug!(user_id = user_id, "Transaction caches invalidated for user");
    }
}
