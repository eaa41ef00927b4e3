//! Transaction log - lookup, history and reversal

use std::sync::Arc;

use crate::adapters::duckdb::DuckDbStore;
use crate::domain::result::{Error, Result};
use crate::domain::{AccountId, NewTransaction, Principal, Transaction, TransactionId};
use crate::scope::OperationScope;
use crate::services::access::ensure_account_access;

#[derive(Clone)]
pub struct TransactionLogService {
    store: Arc<DuckDbStore>,
    scope: OperationScope,
    reject_repeat_reversals: bool,
}

impl TransactionLogService {
    pub fn new(
        store: Arc<DuckDbStore>,
        scope: OperationScope,
        reject_repeat_reversals: bool,
    ) -> Self {
        Self {
            store,
            scope,
            reject_repeat_reversals,
        }
    }

    pub fn scoped(&self, scope: OperationScope) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    pub fn get_transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.store.get_transaction(id)
    }

    /// All rows touching `account`, newest first (ties broken by id)
    pub fn get_history(&self, account: AccountId) -> Result<Vec<Transaction>> {
        self.store.history(account)
    }

    /// Undo a transfer-like transaction with a compensating movement
    ///
    /// The original row is left untouched; a new `reversal` row moves the
    /// same amount back from the original destination to the original
    /// source, balance-checked like any other debit.
    pub fn reverse(
        &self,
        principal: &Principal,
        id: TransactionId,
        description: &str,
    ) -> Result<Transaction> {
        let reversal = self.store.atomic(&self.scope, |uow| {
            let original = uow.transaction(id)?;
            let plan = original.reversal_plan()?;

            if self.reject_repeat_reversals {
                if let Some(existing) = uow.find_reversal_of(id)? {
                    return Err(Error::AlreadyReversed {
                        original: id,
                        reversal: existing,
                    });
                }
            }

            ensure_account_access(principal, plan.source, uow.account_owner(plan.source)?)?;
            uow.apply_dual_update(
                Some((plan.source, plan.amount)),
                Some((plan.destination, plan.amount)),
            )?;
            uow.record(&NewTransaction::reversal(&plan, description))
        })?;

        tracing::info!(
            original = %id,
            transaction = %reversal.id,
            "reversal committed"
        );
        Ok(reversal)
    }
}
