//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower::util::ServiceExt;

use ledger_backend::api::{self, AppState};
use ledger_backend::auth::TokenService;
use ledger_backend::cache::{CacheService, MemoryCache};
use ledger_backend::domain::{Role, UserId};
use ledger_backend::processing::{
    queue, JobReceiver, LedgerService, PoolStats, TransactionGateway, WorkerPool, WorkerPoolConfig,
};
use ledger_backend::store::{MemoryBalanceStore, MemoryTransactionLog};

pub const JWT_SECRET: &str = "test-secret";

/// Worker settings for tests: no per-job pause
pub fn fast_workers(worker_count: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        worker_count,
        queue_capacity: 100,
        job_delay: Duration::ZERO,
    }
}

pub fn memory_ledger(
    balances: &[(UserId, Decimal)],
) -> (
    Arc<LedgerService>,
    Arc<MemoryBalanceStore>,
    Arc<MemoryTransactionLog>,
) {
    let store = balances
        .iter()
        .fold(MemoryBalanceStore::new(), |store, &(user_id, amount)| {
            store.with_balance(user_id, amount)
        });
    let store = Arc::new(store);
    let log = Arc::new(MemoryTransactionLog::new());

    let ledger = LedgerService::new(store.clone(), log.clone())
        .with_cache(Some(CacheService::new(Arc::new(MemoryCache::new()))));

    (Arc::new(ledger), store, log)
}

/// A running router over in-memory storage
pub struct TestApp {
    pub router: Router,
    pub balances: Arc<MemoryBalanceStore>,
    pub log: Arc<MemoryTransactionLog>,
    pub tokens: TokenService,
    workers: Option<WorkerPool>,
    // Keeps the queue open when no workers consume it
    _receiver: Option<JobReceiver>,
}

impl TestApp {
    pub fn spawn(balances: &[(UserId, Decimal)], config: WorkerPoolConfig) -> Self {
        let (ledger, store, log) = memory_ledger(balances);
        let workers = WorkerPool::start(config, ledger.clone());
        let gateway = TransactionGateway::new(ledger, workers.queue());

        Self::assemble(gateway, store, log, Some(workers), None)
    }

    /// An app whose queue is never drained
    pub fn without_workers(balances: &[(UserId, Decimal)], queue_capacity: usize) -> Self {
        let (ledger, store, log) = memory_ledger(balances);
        let (queue, receiver) = queue::bounded(queue_capacity);
        let gateway = TransactionGateway::new(ledger, queue);

        Self::assemble(gateway, store, log, None, Some(receiver))
    }

    fn assemble(
        gateway: TransactionGateway,
        balances: Arc<MemoryBalanceStore>,
        log: Arc<MemoryTransactionLog>,
        workers: Option<WorkerPool>,
        receiver: Option<JobReceiver>,
    ) -> Self {
        let tokens = TokenService::new(JWT_SECRET);
        let router = api::build_router(AppState::new(gateway, tokens.clone()));

        Self {
            router,
            balances,
            log,
            tokens,
            workers,
            _receiver: receiver,
        }
    }

    pub fn token(&self, user_id: UserId, role: Role) -> String {
        self.tokens
            .issue(user_id, role, None, chrono::Duration::hours(1))
            .unwrap()
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, json)
    }

    pub fn stats(&self) -> PoolStats {
        self.workers.as_ref().map(WorkerPool::stats).unwrap_or_default()
    }

    /// Wait until the workers have finished `count` jobs
    pub async fn wait_for_processed(&self, count: u64) {
        wait_for_processed(self.workers.as_ref().expect("app has no workers"), count).await;
    }

    /// Drain and stop the workers; the router stays usable
    pub async fn shutdown(&mut self) -> PoolStats {
        match self.workers.take() {
            Some(workers) => workers.shutdown().await,
            None => PoolStats::default(),
        }
    }
}

pub async fn wait_for_processed(workers: &WorkerPool, count: u64) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while workers.stats().processed < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("workers did not finish in time");
}

/// Parse a decimal the API rendered as a JSON string or number
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        Value::Number(n) => n.to_string().parse().unwrap(),
        other => panic!("not a decimal: {other}"),
    }
}

/// Setup test database - truncate tables
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query("TRUNCATE TABLE transactions, balances RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}
