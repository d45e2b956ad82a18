//! Domain module
//!
//! Core ledger types and rules.

pub mod amount;
pub mod context;
pub mod error;
pub mod ledger;

pub use amount::{Amount, AmountError, Balance};
pub use context::{OperationContext, Role};
pub use error::DomainError;
pub use ledger::{
    BalanceRecord, NewTransaction, TransactionRecord, TransactionStatus, TransactionType, UserId,
};
