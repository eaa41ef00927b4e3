//! Access policy for mutating operations
//!
//! Checks are pure functions over the principal and the resource owner so
//! they can run inside a unit of work, before any row is touched.

use crate::domain::result::{Error, Result};
use crate::domain::{AccountId, Loan, Principal, UserId};

/// Debiting `account` requires owning it (operators always pass)
///
/// `owner` is the account's owner, `None` when the account does not exist.
pub fn ensure_account_access(
    principal: &Principal,
    account: AccountId,
    owner: Option<UserId>,
) -> Result<()> {
    let owner = owner.ok_or(Error::AccountNotFound(account))?;
    match principal {
        Principal::Operator => Ok(()),
        Principal::User(user) if *user == owner => Ok(()),
        Principal::User(user) => Err(Error::unauthorized(format!(
            "user {} does not own account {}",
            user, account
        ))),
    }
}

pub fn ensure_loan_access(principal: &Principal, loan: &Loan) -> Result<()> {
    match principal {
        Principal::Operator => Ok(()),
        Principal::User(user) if *user == loan.user => Ok(()),
        Principal::User(user) => Err(Error::unauthorized(format!(
            "user {} does not own loan {}",
            user, loan.id
        ))),
    }
}

pub fn ensure_operator(principal: &Principal, action: &str) -> Result<()> {
    if principal.is_operator() {
        Ok(())
    } else {
        Err(Error::unauthorized(format!("{} requires an operator", action)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LoanId, LoanState};
    use chrono::Utc;
    use rust_decimal::Decimal;

    #[test]
    fn test_owner_and_operator_may_debit() {
        let account = AccountId(5);
        assert!(ensure_account_access(&Principal::user(1), account, Some(UserId(1))).is_ok());
        assert!(ensure_account_access(&Principal::Operator, account, Some(UserId(1))).is_ok());
    }

    #[test]
    fn test_stranger_may_not_debit() {
        let err = ensure_account_access(&Principal::user(2), AccountId(5), Some(UserId(1)))
            .unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn test_missing_account_reported_before_ownership() {
        let err = ensure_account_access(&Principal::user(2), AccountId(5), None).unwrap_err();
        assert!(matches!(err, Error::AccountNotFound(AccountId(5))));
    }

    #[test]
    fn test_loan_access() {
        let now = Utc::now();
        let loan = Loan {
            id: LoanId(3),
            user: UserId(9),
            account: AccountId(1),
            principal: Decimal::ONE,
            annual_rate: Decimal::ONE,
            start_date: now,
            next_payment_due: None,
            state: LoanState::Active,
            repaid_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(ensure_loan_access(&Principal::user(9), &loan).is_ok());
        assert!(ensure_loan_access(&Principal::user(8), &loan).is_err());
        assert!(ensure_loan_access(&Principal::Operator, &loan).is_ok());
    }

    #[test]
    fn test_operator_only() {
        assert!(ensure_operator(&Principal::Operator, "mark as repaid").is_ok());
        let err = ensure_operator(&Principal::user(1), "mark as repaid").unwrap_err();
        assert_eq!(err.to_string(), "Unauthorized: mark as repaid requires an operator");
    }
}
