//! Ledger storage
//!
//! The balance store and the transaction log, behind traits so the
//! PostgreSQL and in-memory backends are interchangeable. Both backends
//! serialize mutations through [`AccountLocks`].

use async_trait::async_trait;

use crate::domain::{Amount, BalanceRecord, NewTransaction, TransactionRecord, UserId};
use crate::error::AppResult;

pub mod locks;
pub mod memory;
pub mod postgres;

pub use locks::{AccountGuard, AccountLocks};
pub use memory::{MemoryBalanceStore, MemoryTransactionLog};
pub use postgres::{PgBalanceStore, PgTransactionLog};

/// Post-transfer state of both sides
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    pub from: BalanceRecord,
    pub to: BalanceRecord,
}

/// Per-user balances with transactional read-modify-write.
///
/// Amounts are always positive, `Amount` enforces it.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Open a zero balance for a newly created user
    async fn create(&self, user_id: UserId) -> AppResult<BalanceRecord>;

    async fn get(&self, user_id: UserId) -> AppResult<BalanceRecord>;

    async fn deposit(&self, user_id: UserId, amount: &Amount) -> AppResult<BalanceRecord>;

    /// Fails with insufficient funds rather than going negative
    async fn withdraw(&self, user_id: UserId, amount: &Amount) -> AppResult<BalanceRecord>;

    /// Debit `from` and credit `to` as one unit; nothing changes on failure
    async fn transfer(
        &self,
        from_user_id: UserId,
        to_user_id: UserId,
        amount: &Amount,
    ) -> AppResult<TransferOutcome>;
}

/// Append-only log of completed balance mutations
#[async_trait]
pub trait TransactionLog: Send + Sync {
    async fn append(&self, transaction: NewTransaction) -> AppResult<TransactionRecord>;

    async fn get_by_id(&self, id: i64) -> AppResult<TransactionRecord>;

    /// Records where the user is either side, newest first
    async fn get_by_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<TransactionRecord>>;

    /// All records, newest first
    async fn get_all(&self, limit: i64, offset: i64) -> AppResult<Vec<TransactionRecord>>;
}
