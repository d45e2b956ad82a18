//! In-memory backend
//!
//! Process-local balance store and transaction log, used by the `memory`
//! storage backend and by tests. Locking mirrors the PostgreSQL store.
//!
//! `get` waits for the account lock, so it never observes a transfer half
//! applied. `total` reads without locks and is only exact when no mutation
//! is in flight.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::domain::{
    Amount, BalanceRecord, DomainError, NewTransaction, TransactionRecord, UserId,
};
use crate::error::AppResult;

use super::{AccountLocks, BalanceStore, TransactionLog, TransferOutcome};

#[derive(Debug, Default)]
pub struct MemoryBalanceStore {
    balances: DashMap<UserId, BalanceRecord>,
    locks: AccountLocks,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a balance directly; intended for fixtures and local runs
    pub fn with_balance(self, user_id: UserId, amount: Decimal) -> Self {
        self.balances.insert(
            user_id,
            BalanceRecord {
                user_id,
                amount,
                last_updated_at: Utc::now(),
            },
        );
        self
    }

    /// Sum of every balance, for consistency checks once writers are idle
    pub fn total(&self) -> Decimal {
        self.balances.iter().map(|entry| entry.amount).sum()
    }

    fn snapshot(&self, user_id: UserId) -> AppResult<BalanceRecord> {
        self.balances
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DomainError::BalanceNotFound(user_id).into())
    }

    fn store(&self, mut record: BalanceRecord, amount: Decimal) -> BalanceRecord {
        record.amount = amount;
        record.last_updated_at = Utc::now();
        self.balances.insert(record.user_id, record.clone());
        record
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn create(&self, user_id: UserId) -> AppResult<BalanceRecord> {
        match self.balances.entry(user_id) {
            Entry::Occupied(_) => Err(DomainError::BalanceAlreadyExists(user_id).into()),
            Entry::Vacant(slot) => Ok(slot.insert(BalanceRecord::opened(user_id)).value().clone()),
        }
    }

    async fn get(&self, user_id: UserId) -> AppResult<BalanceRecord> {
        let _guard = self.locks.lock(user_id).await;
        self.snapshot(user_id)
    }

    async fn deposit(&self, user_id: UserId, amount: &Amount) -> AppResult<BalanceRecord> {
        let _guard = self.locks.lock(user_id).await;

        let current = self.snapshot(user_id)?;
        let new_amount = current.credited(amount);
        Ok(self.store(current, new_amount))
    }

    async fn withdraw(&self, user_id: UserId, amount: &Amount) -> AppResult<BalanceRecord> {
        let _guard = self.locks.lock(user_id).await;

        let current = self.snapshot(user_id)?;
        let new_amount = current.debited(amount)?;
        Ok(self.store(current, new_amount))
    }

    async fn transfer(
        &self,
        from_user_id: UserId,
        to_user_id: UserId,
        amount: &Amount,
    ) -> AppResult<TransferOutcome> {
        if from_user_id == to_user_id {
            return Err(DomainError::SameUserTransfer.into());
        }

        let _guard = self.locks.lock_pair(from_user_id, to_user_id).await;

        // Both sides are read before anything is written
        let from = self.snapshot(from_user_id)?;
        let to = self.snapshot(to_user_id)?;

        let from_amount = from.debited(amount)?;
        let to_amount = to.credited(amount);

        Ok(TransferOutcome {
            from: self.store(from, from_amount),
            to: self.store(to, to_amount),
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryTransactionLog {
    records: RwLock<Vec<TransactionRecord>>,
}

impl MemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

fn page<'a>(
    records: impl Iterator<Item = &'a TransactionRecord>,
    limit: i64,
    offset: i64,
) -> Vec<TransactionRecord> {
    records
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .cloned()
        .collect()
}

#[async_trait]
impl TransactionLog for MemoryTransactionLog {
    async fn append(&self, transaction: NewTransaction) -> AppResult<TransactionRecord> {
        let mut records = self.records.write().await;
        let id = records.len() as i64 + 1;
        let record = TransactionRecord::from_new(id, transaction, Utc::now());
        records.push(record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: i64) -> AppResult<TransactionRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|record| record.id == id)
            .cloned()
            .ok_or_else(|| DomainError::TransactionNotFound(id).into())
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<TransactionRecord>> {
        let records = self.records.read().await;
        let mine = records.iter().rev().filter(|record| record.involves(user_id));
        Ok(page(mine, limit, offset))
    }

    async fn get_all(&self, limit: i64, offset: i64) -> AppResult<Vec<TransactionRecord>> {
        let records = self.records.read().await;
        Ok(page(records.iter().rev(), limit, offset))
    }
}
