//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Per-field validation messages, keyed by field name
pub type FieldErrors = BTreeMap<String, String>;

/// HTTP-mappable error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Validation,
    ServiceUnavailable,
    Database,
    Internal,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Database | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("validation failed")]
    Validation(FieldErrors),

    #[error("job queue is full, please try again later")]
    QueueFull,

    #[error("transaction processing is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("{context}: {source}")]
    Database {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<sqlx::Error> for AppError {
    fn from(source: sqlx::Error) -> Self {
        AppError::Database {
            context: "database operation failed".to_string(),
            source,
        }
    }
}

impl AppError {
    /// Wrap a storage failure with a message naming the failed operation
    pub fn database(context: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::Database {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::BadRequest(_) => ErrorKind::BadRequest,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::QueueFull => ErrorKind::Conflict,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::ShuttingDown => ErrorKind::ServiceUnavailable,
            AppError::Domain(domain_err) => match domain_err {
                DomainError::InvalidAmount(_) | DomainError::UnknownTransactionType(_) => {
                    ErrorKind::BadRequest
                }
                DomainError::BalanceNotFound(_) | DomainError::TransactionNotFound(_) => {
                    ErrorKind::NotFound
                }
                DomainError::InsufficientFunds { .. }
                | DomainError::BalanceAlreadyExists(_)
                | DomainError::SameUserTransfer => ErrorKind::Conflict,
            },
            AppError::Database { .. } => ErrorKind::Database,
            AppError::Internal(_) | AppError::Config(_) => ErrorKind::Internal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Validation(_) => "validation_error",
            AppError::QueueFull => "queue_full",
            AppError::ShuttingDown => "shutting_down",
            AppError::Domain(domain_err) => match domain_err {
                DomainError::InsufficientFunds { .. } => "insufficient_funds",
                DomainError::InvalidAmount(_) => "invalid_amount",
                DomainError::BalanceNotFound(_) => "balance_not_found",
                DomainError::BalanceAlreadyExists(_) => "balance_exists",
                DomainError::TransactionNotFound(_) => "transaction_not_found",
                DomainError::SameUserTransfer => "same_user_transfer",
                DomainError::UnknownTransactionType(_) => "unknown_transaction_type",
            },
            AppError::Database { .. } => "database_error",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
        }
    }
}

/// Error half of the response envelope
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<FieldErrors>,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let code = self.code();

        // Server-side causes are logged, never echoed to the caller
        let message = match &self {
            AppError::Database { context, source } => {
                tracing::error!(error = ?source, "{}", context);
                context.clone()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "internal server error".to_string()
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let details = match self {
            AppError::Validation(fields) => Some(fields),
            _ => None,
        };

        let body = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                message,
                code,
                details,
            },
        };

        (kind.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_domain_error_kinds() {
        let insufficient = AppError::from(DomainError::insufficient_funds(1, dec!(150), dec!(100)));
        assert_eq!(insufficient.kind(), ErrorKind::Conflict);

        let same_user = AppError::from(DomainError::SameUserTransfer);
        assert_eq!(same_user.kind().status(), StatusCode::CONFLICT);

        let missing = AppError::from(DomainError::BalanceNotFound(3));
        assert_eq!(missing.kind().status(), StatusCode::NOT_FOUND);

        let unknown = AppError::from(DomainError::UnknownTransactionType("x".into()));
        assert_eq!(unknown.kind().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_queue_errors() {
        assert_eq!(AppError::QueueFull.kind().status(), StatusCode::CONFLICT);
        assert_eq!(AppError::ShuttingDown.kind().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_database_error_hides_cause() {
        let err = AppError::database("failed to update balance", sqlx::Error::RowNotFound);
        assert_eq!(err.kind(), ErrorKind::Database);
        assert_eq!(err.kind().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().starts_with("failed to update balance"));
    }
}
