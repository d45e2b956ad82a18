//! ledger_backend - ledger API with an asynchronous transaction core
//!
//! Deposits and withdrawals are queued for a worker pool; transfers and
//! debits are applied inline. Balances and records live in PostgreSQL (or
//! in memory for local runs), with an optional Redis read cache.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ledger_backend::api::{self, AppState};
use ledger_backend::auth::TokenService;
use ledger_backend::cache::{CacheService, RedisCache};
use ledger_backend::config::StorageBackend;
use ledger_backend::db;
use ledger_backend::processing::{LedgerService, TransactionGateway, WorkerPool, WorkerPoolConfig};
use ledger_backend::store::{
    BalanceStore, MemoryBalanceStore, MemoryTransactionLog, PgBalanceStore, PgTransactionLog,
    TransactionLog,
};
use ledger_backend::Config;

/// Initialize tracing/logging
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ledger_backend=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

struct Storage {
    balances: Arc<dyn BalanceStore>,
    log: Arc<dyn TransactionLog>,
    pool: Option<PgPool>,
}

async fn open_storage(config: &Config) -> anyhow::Result<Storage> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow!("DATABASE_URL is required for the postgres backend"))?;

            tracing::info!("Connecting to database...");
            let pool = db::connect(url, config.database_max_connections).await?;
            db::verify_connection(&pool).await?;

            if !db::check_schema(&pool).await? {
                tracing::error!("Database schema is not complete. Please run migrations.");
                return Err(anyhow!("Database schema incomplete"));
            }
            tracing::info!("Database connected successfully");

            Ok(Storage {
                balances: Arc::new(PgBalanceStore::new(pool.clone())),
                log: Arc::new(PgTransactionLog::new(pool.clone())),
                pool: Some(pool),
            })
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; all state is lost on exit");
            Ok(Storage {
                balances: Arc::new(MemoryBalanceStore::new()),
                log: Arc::new(MemoryTransactionLog::new()),
                pool: None,
            })
        }
    }
}

async fn connect_cache(config: &Config) -> Option<CacheService> {
    let Some(url) = config.redis_url.as_deref() else {
        tracing::info!("REDIS_URL not set, read cache disabled");
        return None;
    };

    match RedisCache::connect(url).await {
        Ok(cache) => {
            tracing::info!("Redis read cache enabled");
            Some(CacheService::new(Arc::new(cache)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Redis unavailable, continuing without cache");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.json_logs || config.is_production());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(
        environment = %config.environment,
        backend = ?config.storage_backend,
        "Starting ledger backend"
    );

    let storage = open_storage(&config).await?;
    let cache = connect_cache(&config).await;

    let ledger = Arc::new(LedgerService::new(storage.balances, storage.log).with_cache(cache));
    let workers = WorkerPool::start(WorkerPoolConfig::from(&config), ledger.clone());
    let gateway = TransactionGateway::new(ledger, workers.queue());

    let app = api::build_router(AppState::new(gateway, TokenService::new(&config.jwt_secret)));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let shutdown = CancellationToken::new();
    let mut server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }
    });

    let server_exited = tokio::select! {
        _ = shutdown_signal() => false,
        result = &mut server => {
            tracing::error!(result = ?result, "HTTP server exited unexpectedly");
            true
        }
    };

    // Stop accepting connections, give in-flight requests a deadline
    shutdown.cancel();
    if !server_exited {
        match tokio::time::timeout(config.shutdown_timeout, &mut server).await {
            Ok(Ok(Ok(()))) => tracing::info!("HTTP server stopped"),
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server error"),
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = config.shutdown_timeout.as_secs(),
                    "In-flight requests did not finish in time, aborting"
                );
                server.abort();
            }
        }
    }

    // Then drain queued jobs before the database goes away
    workers.shutdown().await;

    if let Some(pool) = storage.pool {
        pool.close().await;
        tracing::info!("Database connections closed");
    }
    tracing::info!("Goodbye!");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
