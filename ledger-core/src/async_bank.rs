//! Async facade over the ledger services
//!
//! Each call runs on tokio's blocking pool with its own cancellation token.
//! When the awaiting future is dropped, or the call's timeout elapses, the
//! token is tripped and the unit of work rolls back instead of committing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, AccountId, Loan, LoanId, LoanPayment, Principal, Transaction, TransactionId, UserId,
};
use crate::scope::{CancelOnDrop, CancelToken, OperationScope};
use crate::services::{LedgerService, LoanService, Repayment, TransactionLogService};

#[derive(Clone)]
pub struct AsyncBank {
    ledger: LedgerService,
    log: TransactionLogService,
    loans: LoanService,
    timeout: Option<Duration>,
}

impl AsyncBank {
    pub fn new(
        ledger: LedgerService,
        log: TransactionLogService,
        loans: LoanService,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            ledger,
            log,
            loans,
            timeout,
        }
    }

    /// Same facade with a different per-call timeout
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `op` on the blocking pool under a fresh cancellation token
    ///
    /// On timeout the token is cancelled. If that happens before the unit of
    /// work starts committing the call fails with `Timeout` and nothing is
    /// applied; otherwise the commit is already in flight and its real
    /// outcome is returned.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(OperationScope) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let token = CancelToken::new();
        let mut guard = CancelOnDrop::new(token.clone());
        let mut scope = OperationScope::unbounded().with_cancel(token.clone());
        if let Some(timeout) = self.timeout {
            scope = scope.with_timeout(timeout);
        }

        let mut handle = tokio::task::spawn_blocking(move || op(scope));
        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    if token.cancel() {
                        guard.disarm();
                        tracing::debug!("call timed out before commit, rolled back");
                        return Err(Error::Timeout);
                    }
                    handle.await
                }
            },
            None => handle.await,
        };
        guard.disarm();

        joined.map_err(|e| Error::database(format!("blocking task failed: {}", e)))?
    }

    pub async fn create_account(&self, principal: Principal, owner: UserId) -> Result<Account> {
        let ledger = self.ledger.clone();
        self.run(move |scope| ledger.scoped(scope).create_account(&principal, owner))
            .await
    }

    pub async fn get_balance(&self, account: AccountId) -> Result<Decimal> {
        let ledger = self.ledger.clone();
        self.run(move |_| ledger.get_balance(account)).await
    }

    pub async fn deposit(
        &self,
        principal: Principal,
        to: AccountId,
        amount: Decimal,
        description: String,
    ) -> Result<Transaction> {
        let ledger = self.ledger.clone();
        self.run(move |scope| {
            ledger
                .scoped(scope)
                .deposit(&principal, to, amount, &description)
        })
        .await
    }

    pub async fn withdraw(
        &self,
        principal: Principal,
        from: AccountId,
        amount: Decimal,
        description: String,
    ) -> Result<Transaction> {
        let ledger = self.ledger.clone();
        self.run(move |scope| {
            ledger
                .scoped(scope)
                .withdraw(&principal, from, amount, &description)
        })
        .await
    }

    pub async fn transfer(
        &self,
        principal: Principal,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        description: String,
    ) -> Result<Transaction> {
        let ledger = self.ledger.clone();
        self.run(move |scope| {
            ledger
                .scoped(scope)
                .transfer(&principal, from, to, amount, &description)
        })
        .await
    }

    pub async fn credit_payment(
        &self,
        principal: Principal,
        from: AccountId,
        amount: Decimal,
        description: String,
    ) -> Result<Transaction> {
        let ledger = self.ledger.clone();
        self.run(move |scope| {
            ledger
                .scoped(scope)
                .credit_payment(&principal, from, amount, &description)
        })
        .await
    }

    pub async fn reverse_transaction(
        &self,
        principal: Principal,
        id: TransactionId,
        description: String,
    ) -> Result<Transaction> {
        let log = self.log.clone();
        self.run(move |scope| log.scoped(scope).reverse(&principal, id, &description))
            .await
    }

    pub async fn get_history(&self, account: AccountId) -> Result<Vec<Transaction>> {
        let log = self.log.clone();
        self.run(move |_| log.get_history(account)).await
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction> {
        let log = self.log.clone();
        self.run(move |_| log.get_transaction(id)).await
    }

    pub async fn take_loan(
        &self,
        principal: Principal,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Loan> {
        let loans = self.loans.clone();
        self.run(move |scope| loans.scoped(scope).take_loan(&principal, account, amount))
            .await
    }

    pub async fn repay_loan(&self, principal: Principal, id: LoanId) -> Result<Repayment> {
        let loans = self.loans.clone();
        self.run(move |scope| loans.scoped(scope).repay_loan(&principal, id))
            .await
    }

    pub async fn repay_partial_loan(
        &self,
        principal: Principal,
        id: LoanId,
        amount: Decimal,
    ) -> Result<LoanPayment> {
        let loans = self.loans.clone();
        self.run(move |scope| loans.scoped(scope).repay_partial(&principal, id, amount))
            .await
    }

    pub async fn mark_loan_as_repaid(&self, principal: Principal, id: LoanId) -> Result<Loan> {
        let loans = self.loans.clone();
        self.run(move |scope| loans.scoped(scope).mark_as_repaid(&principal, id))
            .await
    }

    pub async fn get_outstanding_debt(&self, id: LoanId) -> Result<Decimal> {
        let loans = self.loans.clone();
        self.run(move |scope| loans.scoped(scope).outstanding_debt(id))
            .await
    }

    pub async fn get_outstanding_debt_at(&self, id: LoanId, as_of: DateTime<Utc>) -> Result<Decimal> {
        let loans = self.loans.clone();
        self.run(move |scope| loans.scoped(scope).outstanding_debt_at(id, as_of))
            .await
    }

    pub async fn get_user_loans(&self, user: UserId) -> Result<Vec<Loan>> {
        let loans = self.loans.clone();
        self.run(move |_| loans.get_user_loans(user)).await
    }

    pub async fn get_loan(&self, id: LoanId) -> Result<Loan> {
        let loans = self.loans.clone();
        self.run(move |_| loans.get_loan(id)).await
    }
}
