//! Transaction submission gateway
//!
//! Deposits and withdrawals are accepted onto the queue and answered
//! without waiting for the outcome. Transfers and debits run inline and the
//! caller sees the real result. Reads go through the cache when one is
//! configured.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{self, CacheService, PageScope};
use crate::domain::{
    Amount, BalanceRecord, DomainError, OperationContext, TransactionRecord, UserId,
};
use crate::error::{AppError, AppResult};

use super::{Job, JobQueue, LedgerService, Operation};

pub const DEFAULT_HISTORY_LIMIT: i64 = 10;
pub const DEFAULT_ALL_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// A validated limit/offset pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.clamp(0, MAX_PAGE_LIMIT),
            offset: offset.max(0),
        }
    }
}

#[derive(Clone)]
pub struct TransactionGateway {
    ledger: Arc<LedgerService>,
    queue: JobQueue,
}

impl TransactionGateway {
    pub fn new(ledger: Arc<LedgerService>, queue: JobQueue) -> Self {
        Self { ledger, queue }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    fn ensure_may_act_for(ctx: &OperationContext, user_id: UserId) -> AppResult<()> {
        if ctx.may_act_for(user_id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "user {} may not act for user {}",
                ctx.user_id, user_id
            )))
        }
    }

    fn enqueue(&self, ctx: &OperationContext, job: Job) -> AppResult<Job> {
        Self::ensure_may_act_for(ctx, job.user_id)?;
        self.queue.submit(job.clone())?;

        tracing::info!(
            job_id = %job.id,
            user_id = job.user_id,
            transaction_type = %job.transaction_type(),
            amount = %job.amount,
            correlation_id = ?ctx.correlation_id,
            "Job queued"
        );
        Ok(job)
    }

    /// Queue a deposit; the returned job is an acknowledgement, not an outcome
    pub fn submit_deposit(
        &self,
        ctx: &OperationContext,
        user_id: UserId,
        amount: Amount,
    ) -> AppResult<Job> {
        self.enqueue(ctx, Job::deposit(user_id, amount))
    }

    pub fn submit_withdraw(
        &self,
        ctx: &OperationContext,
        user_id: UserId,
        amount: Amount,
    ) -> AppResult<Job> {
        self.enqueue(ctx, Job::withdraw(user_id, amount))
    }

    /// Move funds from the caller to `to_user_id`
    pub async fn transfer(
        &self,
        ctx: &OperationContext,
        to_user_id: UserId,
        amount: Amount,
    ) -> AppResult<TransactionRecord> {
        let record = self
            .ledger
            .execute(ctx.user_id, Operation::Transfer { to_user_id }, amount)
            .await?;

        tracing::info!(
            transaction_id = record.id,
            from_user_id = ctx.user_id,
            to_user_id = to_user_id,
            amount = %amount,
            correlation_id = ?ctx.correlation_id,
            "Transfer completed"
        );
        Ok(record)
    }

    /// Credit the caller's own balance
    pub async fn debit(&self, ctx: &OperationContext, amount: Amount) -> AppResult<TransactionRecord> {
        let record = self
            .ledger
            .execute(ctx.user_id, Operation::Debit, amount)
            .await?;

        tracing::info!(
            transaction_id = record.id,
            user_id = ctx.user_id,
            amount = %amount,
            correlation_id = ?ctx.correlation_id,
            "Debit completed"
        );
        Ok(record)
    }

    /// The caller's records, newest first
    pub async fn history(
        &self,
        ctx: &OperationContext,
        page: Page,
    ) -> AppResult<Vec<TransactionRecord>> {
        let key = cache::user_history_key(ctx.user_id, page.limit, page.offset);
        if let Some(records) = self.cached(&key).await {
            tracing::debug!(user_id = ctx.user_id, "Transaction history served from cache");
            return Ok(records);
        }

        let scope = PageScope::User(ctx.user_id);
        let seen = self.generation(scope);
        let records = self
            .ledger
            .log()
            .get_by_user(ctx.user_id, page.limit, page.offset)
            .await?;

        self.store_page(&key, &records, cache::USER_HISTORY_TTL, scope, seen)
            .await;
        Ok(records)
    }

    /// One record; non-admins only see records they are part of
    pub async fn transaction(&self, ctx: &OperationContext, id: i64) -> AppResult<TransactionRecord> {
        let key = cache::transaction_key(id);
        let record = match self.cached::<TransactionRecord>(&key).await {
            Some(record) => record,
            None => {
                let record = self.ledger.log().get_by_id(id).await?;
                self.store_cached(&key, &record, cache::TRANSACTION_TTL).await;
                record
            }
        };

        if !ctx.is_admin() && !record.involves(ctx.user_id) {
            return Err(DomainError::TransactionNotFound(id).into());
        }
        Ok(record)
    }

    /// Every record, newest first; admin only
    pub async fn all(&self, ctx: &OperationContext, page: Page) -> AppResult<Vec<TransactionRecord>> {
        if !ctx.is_admin() {
            return Err(AppError::Forbidden("admin role required".to_string()));
        }

        let key = cache::all_transactions_key(page.limit, page.offset);
        if let Some(records) = self.cached(&key).await {
            return Ok(records);
        }

        let seen = self.generation(PageScope::All);
        let records = self.ledger.log().get_all(page.limit, page.offset).await?;
        self.store_page(&key, &records, cache::ALL_TRANSACTIONS_TTL, PageScope::All, seen)
            .await;
        Ok(records)
    }

    pub async fn current_balance(&self, ctx: &OperationContext) -> AppResult<BalanceRecord> {
        self.ledger.balances().get(ctx.user_id).await
    }

    /// Open a zero balance for a new user account
    pub async fn open_balance(
        &self,
        ctx: &OperationContext,
        user_id: UserId,
    ) -> AppResult<BalanceRecord> {
        Self::ensure_may_act_for(ctx, user_id)?;
        let balance = self.ledger.balances().create(user_id).await?;

        tracing::info!(
            user_id = user_id,
            opened_by = ctx.user_id,
            correlation_id = ?ctx.correlation_id,
            "Balance opened"
        );
        Ok(balance)
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.ledger.cache() {
            Some(cache) => cache.get_json(key).await,
            None => None,
        }
    }

    async fn store_cached<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Some(cache) = self.ledger.cache() {
            cache.set_json(key, value, ttl).await;
        }
    }

    fn generation(&self, scope: PageScope) -> u64 {
        self.ledger
            .cache()
            .map(|cache| cache.generation(scope))
            .unwrap_or_default()
    }

    async fn store_page<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
        scope: PageScope,
        seen: u64,
    ) {
        if let Some(cache) = self.ledger.cache() {
            cache.set_page(key, value, ttl, scope, seen).await;
        }
    }

    pub fn cache(&self) -> Option<&CacheService> {
        self.ledger.cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::domain::Role;
    use crate::error::ErrorKind;
    use crate::processing::queue;
    use crate::store::{MemoryBalanceStore, MemoryTransactionLog};
    use rust_decimal_macros::dec;

    fn gateway(capacity: usize) -> (TransactionGateway, queue::JobReceiver) {
        let balances = Arc::new(
            MemoryBalanceStore::new()
                .with_balance(1, dec!(100))
                .with_balance(2, dec!(10)),
        );
        let ledger = LedgerService::new(balances, Arc::new(MemoryTransactionLog::new()))
            .with_cache(Some(CacheService::new(Arc::new(MemoryCache::new()))));
        let (queue, receiver) = queue::bounded(capacity);
        (TransactionGateway::new(Arc::new(ledger), queue), receiver)
    }

    fn amount(v: i64) -> Amount {
        Amount::from_integer(v).unwrap()
    }

    #[test]
    fn test_page_clamps() {
        assert_eq!(Page::new(5000, -3), Page { limit: 1000, offset: 0 });
    }

    #[tokio::test]
    async fn test_submit_only_queues() {
        let (gateway, receiver) = gateway(4);
        let user = OperationContext::new(1, Role::User);

        let job = gateway.submit_deposit(&user, 1, amount(50)).unwrap();
        let queued = receiver.recv().await.unwrap();
        assert_eq!(queued.id, job.id);

        // Nothing applied until a worker runs the job
        assert_eq!(gateway.current_balance(&user).await.unwrap().amount, dec!(100));
    }

    #[tokio::test]
    async fn test_users_may_only_queue_for_themselves() {
        let (gateway, _receiver) = gateway(4);
        let user = OperationContext::new(1, Role::User);
        let admin = OperationContext::new(9, Role::Admin);

        let err = gateway.submit_withdraw(&user, 2, amount(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(gateway.submit_withdraw(&admin, 2, amount(1)).is_ok());
    }

    #[tokio::test]
    async fn test_transfer_overdraft_is_conflict() {
        let (gateway, _receiver) = gateway(4);
        let user = OperationContext::new(1, Role::User);

        let err = gateway.transfer(&user, 2, amount(150)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(gateway.current_balance(&user).await.unwrap().amount, dec!(100));
    }

    #[tokio::test]
    async fn test_history_cache_invalidated_by_transfer() {
        let (gateway, _receiver) = gateway(4);
        let alice = OperationContext::new(1, Role::User);
        let bob = OperationContext::new(2, Role::User);

        assert!(gateway.history(&bob, Page::new(10, 0)).await.unwrap().is_empty());

        gateway.transfer(&alice, 2, amount(40)).await.unwrap();

        let history = gateway.history(&bob, Page::new(10, 0)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_user_id, Some(1));
    }

    #[tokio::test]
    async fn test_open_balance() {
        let (gateway, _receiver) = gateway(4);
        let newcomer = OperationContext::new(5, Role::User);
        let admin = OperationContext::new(9, Role::Admin);

        let err = gateway.open_balance(&newcomer, 6).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let opened = gateway.open_balance(&newcomer, 5).await.unwrap();
        assert_eq!(opened.amount, rust_decimal::Decimal::ZERO);
        assert!(gateway.open_balance(&admin, 6).await.is_ok());

        let err = gateway.open_balance(&admin, 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_record_visibility() {
        let (gateway, _receiver) = gateway(4);
        let alice = OperationContext::new(1, Role::User);
        let carol = OperationContext::new(3, Role::User);
        let admin = OperationContext::new(9, Role::Admin);

        let record = gateway.debit(&alice, amount(1)).await.unwrap();

        assert!(gateway.transaction(&alice, record.id).await.is_ok());
        assert!(gateway.transaction(&admin, record.id).await.is_ok());
        let err = gateway.transaction(&carol, record.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = gateway.all(&alice, Page::new(10, 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(gateway.all(&admin, Page::new(10, 0)).await.unwrap().len(), 1);
    }
}
