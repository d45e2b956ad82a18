//! PostgreSQL backend
//!
//! Balances live in `balances`, records in `transactions`. Every mutation
//! runs in one database transaction with `SELECT ... FOR UPDATE` row locks,
//! taken in ascending user id order, on top of the in-process account locks.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::{
    Amount, BalanceRecord, DomainError, NewTransaction, TransactionRecord, UserId,
};
use crate::error::{AppError, AppResult};

use super::{AccountLocks, BalanceStore, TransactionLog, TransferOutcome};

type BalanceRow = (i64, Decimal, DateTime<Utc>);

type TransactionRow = (
    i64,
    Option<i64>,
    Option<i64>,
    Decimal,
    String,
    String,
    DateTime<Utc>,
);

fn balance_from_row((user_id, amount, last_updated_at): BalanceRow) -> BalanceRecord {
    BalanceRecord {
        user_id,
        amount,
        last_updated_at,
    }
}

fn transaction_from_row(row: TransactionRow) -> AppResult<TransactionRecord> {
    let (id, from_user_id, to_user_id, amount, kind, status, created_at) = row;

    let status = status
        .parse()
        .map_err(|e: String| AppError::Internal(format!("transaction {id}: {e}")))?;

    Ok(TransactionRecord {
        id,
        from_user_id,
        to_user_id,
        amount,
        transaction_type: kind.parse()?,
        status,
        created_at,
    })
}

#[derive(Debug, Clone)]
pub struct PgBalanceStore {
    pool: PgPool,
    locks: Arc<AccountLocks>,
}

impl PgBalanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            locks: Arc::new(AccountLocks::new()),
        }
    }

    async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::database("failed to begin transaction", e))
    }

    async fn fetch_for_update(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
    ) -> AppResult<BalanceRecord> {
        let row: Option<BalanceRow> = sqlx::query_as(
            r#"
            SELECT user_id, amount, last_updated_at
            FROM balances
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| AppError::database("failed to fetch balance", e))?;

        row.map(balance_from_row)
            .ok_or_else(|| DomainError::BalanceNotFound(user_id).into())
    }

    async fn save(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        amount: Decimal,
    ) -> AppResult<BalanceRecord> {
        let row: BalanceRow = sqlx::query_as(
            r#"
            UPDATE balances
            SET amount = $2, last_updated_at = NOW()
            WHERE user_id = $1
            RETURNING user_id, amount, last_updated_at
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| AppError::database("failed to update balance", e))?;

        Ok(balance_from_row(row))
    }

    async fn commit(tx: Transaction<'_, Postgres>) -> AppResult<()> {
        tx.commit()
            .await
            .map_err(|e| AppError::database("failed to commit transaction", e))
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    async fn create(&self, user_id: UserId) -> AppResult<BalanceRecord> {
        let row: Option<BalanceRow> = sqlx::query_as(
            r#"
            INSERT INTO balances (user_id, amount, last_updated_at)
            VALUES ($1, 0, NOW())
            ON CONFLICT (user_id) DO NOTHING
            RETURNING user_id, amount, last_updated_at
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("failed to create balance", e))?;

        row.map(balance_from_row)
            .ok_or_else(|| DomainError::BalanceAlreadyExists(user_id).into())
    }

    async fn get(&self, user_id: UserId) -> AppResult<BalanceRecord> {
        let row: Option<BalanceRow> = sqlx::query_as(
            r#"
            SELECT user_id, amount, last_updated_at
            FROM balances
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("failed to fetch balance", e))?;

        row.map(balance_from_row)
            .ok_or_else(|| DomainError::BalanceNotFound(user_id).into())
    }

    async fn deposit(&self, user_id: UserId, amount: &Amount) -> AppResult<BalanceRecord> {
        let _guard = self.locks.lock(user_id).await;
        let mut tx = self.begin().await?;

        let current = Self::fetch_for_update(&mut tx, user_id).await?;
        let updated = Self::save(&mut tx, user_id, current.credited(amount)).await?;

        Self::commit(tx).await?;
        Ok(updated)
    }

    async fn withdraw(&self, user_id: UserId, amount: &Amount) -> AppResult<BalanceRecord> {
        let _guard = self.locks.lock(user_id).await;
        let mut tx = self.begin().await?;

        let current = Self::fetch_for_update(&mut tx, user_id).await?;
        // An early return drops `tx`, which rolls back
        let remaining = current.debited(amount)?;

        let updated = Self::save(&mut tx, user_id, remaining).await?;

        Self::commit(tx).await?;
        Ok(updated)
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
        let mut tx = self.begin().await?;

        // Row locks in ascending id order
        let (from, to) = if from_user_id < to_user_id {
            let from = Self::fetch_for_update(&mut tx, from_user_id).await?;
            let to = Self::fetch_for_update(&mut tx, to_user_id).await?;
            (from, to)
        } else {
            let to = Self::fetch_for_update(&mut tx, to_user_id).await?;
            let from = Self::fetch_for_update(&mut tx, from_user_id).await?;
            (from, to)
        };

        let from_amount = from.debited(amount)?;
        let to_amount = to.credited(amount);

        let from = Self::save(&mut tx, from_user_id, from_amount).await?;
        let to = Self::save(&mut tx, to_user_id, to_amount).await?;

        Self::commit(tx).await?;

        tracing::debug!(
            "Transfer committed: {} -> {} ({})",
            from_user_id,
            to_user_id,
            amount
        );

        Ok(TransferOutcome { from, to })
    }
}

#[derive(Debug, Clone)]
pub struct PgTransactionLog {
    pool: PgPool,
}

impl PgTransactionLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionLog for PgTransactionLog {
    async fn append(&self, transaction: NewTransaction) -> AppResult<TransactionRecord> {
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO transactions (from_user_id, to_user_id, amount, type, status, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING id, created_at
            "#,
        )
        .bind(transaction.from_user_id)
        .bind(transaction.to_user_id)
        .bind(transaction.amount.value())
        .bind(transaction.transaction_type.as_str())
        .bind(transaction.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database("failed to create transaction", e))?;

        Ok(TransactionRecord::from_new(id, transaction, created_at))
    }

    async fn get_by_id(&self, id: i64) -> AppResult<TransactionRecord> {
        let row: Option<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, from_user_id, to_user_id, amount, type, status, created_at
            FROM transactions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database("failed to get transaction", e))?;

        match row {
            Some(row) => transaction_from_row(row),
            None => Err(DomainError::TransactionNotFound(id).into()),
        }
    }

    async fn get_by_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<TransactionRecord>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, from_user_id, to_user_id, amount, type, status, created_at
            FROM transactions
            WHERE from_user_id = $1 OR to_user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database("failed to get user transactions", e))?;

        rows.into_iter().map(transaction_from_row).collect()
    }

    async fn get_all(&self, limit: i64, offset: i64) -> AppResult<Vec<TransactionRecord>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            r#"
            SELECT id, from_user_id, to_user_id, amount, type, status, created_at
            FROM transactions
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database("failed to get transactions", e))?;

        rows.into_iter().map(transaction_from_row).collect()
    }
}
