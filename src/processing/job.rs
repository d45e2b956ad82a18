//! Queued work items

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Amount, TransactionType, UserId};

/// Balance mutation to apply for the job's user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Deposit,
    Withdraw,
    Transfer { to_user_id: UserId },
    /// Administrative credit
    Debit,
}

impl Operation {
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Operation::Deposit => TransactionType::Deposit,
            Operation::Withdraw => TransactionType::Withdraw,
            Operation::Transfer { .. } => TransactionType::Transfer,
            Operation::Debit => TransactionType::Debit,
        }
    }

    pub fn to_user_id(&self) -> Option<UserId> {
        match self {
            Operation::Transfer { to_user_id } => Some(*to_user_id),
            _ => None,
        }
    }
}

/// A pending request; lives from acceptance until a worker finishes it
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub user_id: UserId,
    pub amount: Amount,
    pub operation: Operation,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(user_id: UserId, amount: Amount, operation: Operation) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            operation,
            submitted_at: Utc::now(),
        }
    }

    pub fn deposit(user_id: UserId, amount: Amount) -> Self {
        Self::new(user_id, amount, Operation::Deposit)
    }

    pub fn withdraw(user_id: UserId, amount: Amount) -> Self {
        Self::new(user_id, amount, Operation::Withdraw)
    }

    pub fn transfer(from_user_id: UserId, to_user_id: UserId, amount: Amount) -> Self {
        Self::new(from_user_id, amount, Operation::Transfer { to_user_id })
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.operation.transaction_type()
    }
}
