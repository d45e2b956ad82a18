//! Domain Error Types
//!
//! Ledger rule violations, independent of the web and storage layers.

use rust_decimal::Decimal;
use thiserror::Error;

use super::{AmountError, UserId};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("insufficient funds for user {user_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        user_id: UserId,
        requested: Decimal,
        available: Decimal,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("balance not found for user {0}")]
    BalanceNotFound(UserId),

    #[error("balance already exists for user {0}")]
    BalanceAlreadyExists(UserId),

    #[error("transaction with id {0} not found")]
    TransactionNotFound(i64),

    #[error("cannot transfer to same user")]
    SameUserTransfer,

    #[error("unknown transaction type: {0}")]
    UnknownTransactionType(String),
}

impl DomainError {
    pub fn insufficient_funds(user_id: UserId, requested: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            user_id,
            requested,
            available,
        }
    }
}
