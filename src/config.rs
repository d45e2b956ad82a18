//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Where balances and transaction records live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local maps; state is lost on restart
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(ConfigError::InvalidValue("STORAGE_BACKEND")),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,

    /// Database connection URL (required for the postgres backend)
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Redis URL; the cache is disabled when unset
    pub redis_url: Option<String>,

    pub host: String,
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// HS256 secret used to verify bearer tokens
    pub jwt_secret: String,

    /// Number of workers draining the job queue
    pub worker_count: usize,

    /// Capacity of the bounded job queue
    pub job_queue_capacity: usize,

    /// Pause each worker takes after finishing a job
    pub worker_job_delay: Duration,

    /// How long in-flight requests get after a shutdown signal
    pub shutdown_timeout: Duration,

    /// Emit JSON logs instead of human-readable lines
    pub json_logs: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage_backend: StorageBackend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let database_url = env::var("DATABASE_URL").ok();
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| ConfigError::MissingEnv("JWT_SECRET"))?;

        let worker_count: usize = parse_or("WORKER_COUNT", 10)?;
        if worker_count == 0 {
            return Err(ConfigError::InvalidValue("WORKER_COUNT"));
        }

        let job_queue_capacity: usize = parse_or("JOB_QUEUE_CAPACITY", 100)?;
        if job_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("JOB_QUEUE_CAPACITY"));
        }

        Ok(Self {
            storage_backend,
            database_url,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_or("PORT", 3000)?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            jwt_secret,
            worker_count,
            job_queue_capacity,
            worker_job_delay: Duration::from_millis(parse_or("WORKER_JOB_DELAY_MS", 1000)?),
            shutdown_timeout: Duration::from_secs(parse_or("SHUTDOWN_TIMEOUT_SECS", 10)?),
            json_logs: env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false),
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Read `key` and parse it, falling back to `default` when unset
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
