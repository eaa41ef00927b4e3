//! Account ledger - balances and the money movements that change them
//!
//! Every movement debits and/or credits through the store's dual-update
//! primitive and appends its log row in the same unit of work.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::adapters::duckdb::DuckDbStore;
use crate::domain::money::{ensure_positive, to_minor_units};
use crate::domain::result::{Error, Result};
use crate::domain::{Account, AccountId, NewTransaction, Principal, Transaction, UserId};
use crate::scope::OperationScope;
use crate::services::access::ensure_account_access;

#[derive(Clone)]
pub struct LedgerService {
    store: Arc<DuckDbStore>,
    scope: OperationScope,
}

impl LedgerService {
    pub fn new(store: Arc<DuckDbStore>, scope: OperationScope) -> Self {
        Self { store, scope }
    }

    /// Same service, with `scope` applied to every unit of work
    pub fn scoped(&self, scope: OperationScope) -> Self {
        Self {
            store: Arc::clone(&self.store),
            scope,
        }
    }

    /// Open an account for `owner`. Users may only open their own.
    pub fn create_account(&self, principal: &Principal, owner: UserId) -> Result<Account> {
        if let Principal::User(user) = principal {
            if *user != owner {
                return Err(Error::unauthorized(format!(
                    "user {} cannot open an account for user {}",
                    user, owner
                )));
            }
        }
        let account = self
            .store
            .atomic(&self.scope, |uow| uow.create_account(owner))?;
        tracing::info!(account = %account.id, owner = %owner, "account opened");
        Ok(account)
    }

    pub fn get_account(&self, account: AccountId) -> Result<Account> {
        self.store.get_account(account)
    }

    pub fn get_balance(&self, account: AccountId) -> Result<Decimal> {
        Ok(self.store.get_account(account)?.balance)
    }

    pub fn account_for_user(&self, user: UserId) -> Result<Option<Account>> {
        self.store.account_by_owner(user)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        self.store.list_accounts()
    }

    /// Credit `to`. Anyone may deposit into any account.
    pub fn deposit(
        &self,
        principal: &Principal,
        to: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<Transaction> {
        self.execute(principal, NewTransaction::deposit(to, amount, description))
    }

    pub fn withdraw(
        &self,
        principal: &Principal,
        from: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<Transaction> {
        self.execute(principal, NewTransaction::withdraw(from, amount, description))
    }

    pub fn transfer(
        &self,
        principal: &Principal,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<Transaction> {
        self.execute(principal, NewTransaction::transfer(from, to, amount, description))
    }

    /// Bank-directed debit of `from`
    pub fn credit_payment(
        &self,
        principal: &Principal,
        from: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<Transaction> {
        self.execute(principal, NewTransaction::credit_payment(from, amount, description))
    }

    fn execute(&self, principal: &Principal, new: NewTransaction) -> Result<Transaction> {
        let amount = ensure_positive(new.amount)?;
        to_minor_units(amount)?;
        if let (Some(from), Some(to)) = (new.source, new.destination) {
            if from == to {
                return Err(Error::SameAccount(from));
            }
        }

        let transaction = self.store.atomic(&self.scope, |uow| {
            if let Some(from) = new.source {
                ensure_account_access(principal, from, uow.account_owner(from)?)?;
            }
            uow.apply_dual_update(
                new.source.map(|from| (from, amount)),
                new.destination.map(|to| (to, amount)),
            )?;
            uow.record(&new)
        })?;

        tracing::info!(
            kind = %transaction.kind,
            transaction = %transaction.id,
            "money movement committed"
        );
        Ok(transaction)
    }
}
