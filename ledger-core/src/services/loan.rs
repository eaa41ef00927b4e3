//! Loan accounting engine
//!
//! Loans accrue simple interest from their start date. The debt is never
//! stored; it is recomputed from the loan row and its payments whenever it is
//! needed. Every balance change goes through the ledger's dual update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::adapters::duckdb::DuckDbStore;
use crate::domain::loan::outstanding_debt;
use crate::domain::money::{ensure_positive, to_minor_units};
use crate::domain::result::{Error, Result};
use crate::domain::{
    AccountId, Loan, LoanId, LoanPayment, NewTransaction, Principal, Transaction, UserId,
};
use crate::ports::RateProvider;
use crate::scope::OperationScope;
use crate::services::access::{ensure_account_access, ensure_loan_access, ensure_operator};

/// Outcome of a full repayment attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repayment {
    pub loan: Loan,
    /// Zero when the loan was already settled and nothing moved
    pub amount_paid: Decimal,
    pub transaction: Option<Transaction>,
    pub remaining: Decimal,
}

#[derive(Clone)]
pub struct LoanService {
    store: Arc<DuckDbStore>,
    scope: OperationScope,
    rates: Arc<dyn RateProvider>,
}

impl LoanService {
    pub fn new(store: Arc<DuckDbStore>, scope: OperationScope, rates: Arc<dyn RateProvider>) -> Self {
        Self { store, scope, rates }
    }

    pub fn scoped(&self, scope: OperationScope) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    /// Issue a loan into `account` at the provider's current rate
    ///
    /// The loan belongs to the calling user; when an operator issues it, to
    /// the account's owner.
    pub fn take_loan(
        &self,
        principal: &Principal,
        account: AccountId,
        amount: Decimal,
    ) -> Result<Loan> {
        let amount = ensure_positive(amount)?;
        to_minor_units(amount)?;
        let rate = self.current_rate()?;

        let loan = self.store.atomic(&self.scope, |uow| {
            let owner = uow.account_owner(account)?;
            ensure_account_access(principal, account, owner)?;
            let user = match (principal.user_id(), owner) {
                (Some(user), _) => user,
                (None, Some(owner)) => owner,
                (None, None) => return Err(Error::AccountNotFound(account)),
            };

            uow.apply_dual_update(None, Some((account, amount)))?;
            let loan = uow.insert_loan(user, account, amount, rate)?;
            uow.record(&NewTransaction::loan_issue(
                account,
                amount,
                format!("Loan issued with interest {:.2}%", rate),
            ))?;
            Ok(loan)
        })?;

        tracing::info!(loan = %loan.id, account = %account, "loan issued");
        Ok(loan)
    }

    fn current_rate(&self) -> Result<Decimal> {
        match self.rates.current_rate() {
            Ok(rate) if rate < Decimal::ZERO => Err(Error::RateUnavailable(format!(
                "{} returned a negative rate",
                self.rates.name()
            ))),
            Ok(rate) => Ok(rate),
            Err(e @ Error::RateUnavailable(_)) => Err(e),
            Err(e) => Err(Error::RateUnavailable(format!("{}: {}", self.rates.name(), e))),
        }
    }

    pub fn outstanding_debt(&self, id: LoanId) -> Result<Decimal> {
        self.outstanding_debt_at(id, Utc::now())
    }

    /// Debt as it stands (or stood) at `as_of`, counting every recorded payment
    pub fn outstanding_debt_at(&self, id: LoanId, as_of: DateTime<Utc>) -> Result<Decimal> {
        self.store.atomic(&self.scope, |uow| {
            let loan = uow.loan(id)?;
            let paid = uow.loan_payments_total(id)?;
            Ok(outstanding_debt(&loan, paid, as_of))
        })
    }

    /// Pay off the whole current debt from the loan's account
    ///
    /// Settling a loan whose debt is already zero is a no-op success.
    pub fn repay_loan(&self, principal: &Principal, id: LoanId) -> Result<Repayment> {
        let repayment = self.store.atomic(&self.scope, |uow| {
            let loan = uow.loan(id)?;
            ensure_loan_access(principal, &loan)?;

            let as_of = Utc::now();
            let debt = outstanding_debt(&loan, uow.loan_payments_total(id)?, as_of);
            if debt <= Decimal::ZERO {
                uow.mark_loan_repaid(id, as_of)?;
                return Ok(Repayment {
                    loan: uow.loan(id)?,
                    amount_paid: Decimal::ZERO,
                    transaction: None,
                    remaining: Decimal::ZERO,
                });
            }
            if loan.is_repaid() || !uow.claim_active_loan(id)? {
                return Err(Error::AlreadyRepaid(id));
            }

            ensure_account_access(principal, loan.account, uow.account_owner(loan.account)?)?;
            uow.apply_dual_update(Some((loan.account, debt)), None)?;
            uow.insert_loan_payment(id, debt)?;
            uow.set_next_payment_due(id, Loan::next_due_after(as_of))?;
            let transaction = uow.record(&NewTransaction::credit_payment(
                loan.account,
                debt,
                format!("Repayment for loan ID {}", id),
            ))?;

            let remaining = outstanding_debt(&loan, uow.loan_payments_total(id)?, as_of);
            if remaining <= Decimal::ZERO {
                uow.mark_loan_repaid(id, as_of)?;
            }
            Ok(Repayment {
                loan: uow.loan(id)?,
                amount_paid: debt,
                transaction: Some(transaction),
                remaining,
            })
        })?;

        tracing::info!(
            loan = %id,
            state = repayment.loan.state.as_str(),
            "loan repayment committed"
        );
        Ok(repayment)
    }

    /// Count `amount` against the debt without moving money
    pub fn repay_partial(
        &self,
        principal: &Principal,
        id: LoanId,
        amount: Decimal,
    ) -> Result<LoanPayment> {
        let amount = ensure_positive(amount)?;
        to_minor_units(amount)?;

        let payment = self.store.atomic(&self.scope, |uow| {
            let loan = uow.loan(id)?;
            ensure_loan_access(principal, &loan)?;
            if loan.is_repaid() || !uow.claim_active_loan(id)? {
                return Err(Error::AlreadyRepaid(id));
            }
            uow.insert_loan_payment(id, amount)
        })?;

        tracing::info!(loan = %id, payment = %payment.id, "partial repayment recorded");
        Ok(payment)
    }

    /// Administrative settlement, regardless of the remaining debt
    pub fn mark_as_repaid(&self, principal: &Principal, id: LoanId) -> Result<Loan> {
        ensure_operator(principal, "marking a loan as repaid")?;
        let loan = self.store.atomic(&self.scope, |uow| {
            uow.mark_loan_repaid(id, Utc::now())?;
            uow.loan(id)
        })?;
        tracing::info!(loan = %id, "loan marked as repaid");
        Ok(loan)
    }

    pub fn get_loan(&self, id: LoanId) -> Result<Loan> {
        self.store.get_loan(id)
    }

    pub fn get_user_loans(&self, user: UserId) -> Result<Vec<Loan>> {
        self.store.user_loans(user)
    }

    pub fn get_payments(&self, id: LoanId) -> Result<Vec<LoanPayment>> {
        self.store.get_loan(id)?;
        self.store.loan_payments(id)
    }
}
