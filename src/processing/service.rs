//! Applying operations to the ledger
//!
//! One place that turns an [`Operation`] into a balance mutation, the
//! matching transaction record and cache invalidation. Workers and the
//! synchronous gateway path both go through it.

use std::sync::Arc;

use crate::cache::CacheService;
use crate::domain::{Amount, NewTransaction, TransactionRecord, UserId};
use crate::error::AppResult;
use crate::store::{BalanceStore, TransactionLog};

use super::Operation;

#[derive(Clone)]
pub struct LedgerService {
    balances: Arc<dyn BalanceStore>,
    log: Arc<dyn TransactionLog>,
    cache: Option<CacheService>,
}

impl LedgerService {
    pub fn new(balances: Arc<dyn BalanceStore>, log: Arc<dyn TransactionLog>) -> Self {
        Self {
            balances,
            log,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Option<CacheService>) -> Self {
        self.cache = cache;
        self
    }

    pub fn balances(&self) -> &Arc<dyn BalanceStore> {
        &self.balances
    }

    pub fn log(&self) -> &Arc<dyn TransactionLog> {
        &self.log
    }

    pub fn cache(&self) -> Option<&CacheService> {
        self.cache.as_ref()
    }

    /// Apply `operation` for `user_id` and record it.
    ///
    /// The record is appended only after the balance change has committed.
    pub async fn execute(
        &self,
        user_id: UserId,
        operation: Operation,
        amount: Amount,
    ) -> AppResult<TransactionRecord> {
        let transaction = match operation {
            Operation::Deposit => {
                self.balances.deposit(user_id, &amount).await?;
                NewTransaction::deposit(user_id, amount)
            }
            Operation::Withdraw => {
                self.balances.withdraw(user_id, &amount).await?;
                NewTransaction::withdraw(user_id, amount)
            }
            Operation::Transfer { to_user_id } => {
                self.balances.transfer(user_id, to_user_id, &amount).await?;
                NewTransaction::transfer(user_id, to_user_id, amount)
            }
            Operation::Debit => {
                self.balances.deposit(user_id, &amount).await?;
                NewTransaction::debit(user_id, amount)
            }
        };

        let affected: Vec<UserId> = transaction.affected_users().collect();

        let record = self.log.append(transaction).await.map_err(|e| {
            tracing::error!(
                user_id = user_id,
                transaction_type = %operation.transaction_type(),
                amount = %amount,
                error = %e,
                "Balance updated but transaction record was not written"
            );
            e
        })?;

        if let Some(cache) = &self.cache {
            for user in affected {
                cache.invalidate_user(user).await;
            }
        }

        Ok(record)
    }
}
