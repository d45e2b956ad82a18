//! Ledger records
//!
//! Balances and the append-only transaction records describing every
//! completed balance mutation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Amount, Balance, DomainError};

pub type UserId = i64;

/// Kind of balance mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Transfer,
    /// Administrative credit to the caller's own balance
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdraw => "withdraw",
            TransactionType::Transfer => "transfer",
            TransactionType::Debit => "debit",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdraw" => Ok(TransactionType::Withdraw),
            "transfer" => Ok(TransactionType::Transfer),
            "debit" => Ok(TransactionType::Debit),
            other => Err(DomainError::UnknownTransactionType(other.to_string())),
        }
    }
}

/// Only completed mutations are ever recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(TransactionStatus::Completed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Current balance of one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub user_id: UserId,
    pub amount: Decimal,
    pub last_updated_at: DateTime<Utc>,
}

impl BalanceRecord {
    pub fn opened(user_id: UserId) -> Self {
        Self {
            user_id,
            amount: Decimal::ZERO,
            last_updated_at: Utc::now(),
        }
    }

    pub fn credited(&self, amount: &Amount) -> Decimal {
        self.amount + amount.value()
    }

    /// Amount left after taking `amount` out; never negative
    pub fn debited(&self, amount: &Amount) -> Result<Decimal, DomainError> {
        Balance::new(self.amount)
            .and_then(|balance| balance.debit(amount))
            .map(|balance| balance.value())
            .map_err(|_| DomainError::insufficient_funds(self.user_id, amount.value(), self.amount))
    }
}

/// A record about to be appended; id and timestamp are assigned by the log
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub from_user_id: Option<UserId>,
    pub to_user_id: Option<UserId>,
    pub amount: Amount,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
}

impl NewTransaction {
    pub fn deposit(user_id: UserId, amount: Amount) -> Self {
        Self::completed(None, Some(user_id), amount, TransactionType::Deposit)
    }

    pub fn withdraw(user_id: UserId, amount: Amount) -> Self {
        Self::completed(Some(user_id), None, amount, TransactionType::Withdraw)
    }

    pub fn transfer(from_user_id: UserId, to_user_id: UserId, amount: Amount) -> Self {
        Self::completed(
            Some(from_user_id),
            Some(to_user_id),
            amount,
            TransactionType::Transfer,
        )
    }

    pub fn debit(user_id: UserId, amount: Amount) -> Self {
        Self::completed(None, Some(user_id), amount, TransactionType::Debit)
    }

    fn completed(
        from_user_id: Option<UserId>,
        to_user_id: Option<UserId>,
        amount: Amount,
        transaction_type: TransactionType,
    ) -> Self {
        Self {
            from_user_id,
            to_user_id,
            amount,
            transaction_type,
            status: TransactionStatus::Completed,
        }
    }

    /// Users whose history this record shows up in
    pub fn affected_users(&self) -> impl Iterator<Item = UserId> {
        self.from_user_id.into_iter().chain(self.to_user_id)
    }
}

/// An appended, immutable transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub from_user_id: Option<UserId>,
    pub to_user_id: Option<UserId>,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn from_new(id: i64, new: NewTransaction, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            from_user_id: new.from_user_id,
            to_user_id: new.to_user_id,
            amount: new.amount.value(),
            transaction_type: new.transaction_type,
            status: new.status,
            created_at,
        }
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.from_user_id == Some(user_id) || self.to_user_id == Some(user_id)
    }
}
