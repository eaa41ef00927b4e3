//! Loan accounting integration tests
//!
//! Run with: cargo test --test loan_tests -- --nocapture

mod common;

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use tempfile::TempDir;

use common::{bank, dec, TEST_RATE};
use ledger_core::config::Config;
use ledger_core::ports::RateProvider;
use ledger_core::{BankContext, Error, LoanId, LoanState, Principal, TransactionKind, UserId};

/// Rate source that is always down
struct UnreachableRates;

impl RateProvider for UnreachableRates {
    fn name(&self) -> &str {
        "unreachable"
    }

    fn current_rate(&self) -> ledger_core::domain::result::Result<Decimal> {
        Err(Error::RateUnavailable("connection refused".to_string()))
    }
}

// ============================================================================
// Issue
// ============================================================================

#[test]
fn test_take_loan_credits_account_and_records_issue() {
    let bank = bank();
    let account = bank.account(1, "0");

    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("1000"))
        .unwrap();

    assert_eq!(loan.user, UserId(1));
    assert_eq!(loan.account, account.id);
    assert_eq!(loan.principal, dec("1000"));
    assert_eq!(loan.annual_rate, Decimal::from(TEST_RATE));
    assert_eq!(loan.state, LoanState::Active);
    assert_eq!(loan.next_payment_due, None);
    assert_eq!(bank.balance(&account), dec("1000"));

    let history = bank.ctx.transaction_log_service.get_history(account.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TransactionKind::CreditPayment);
    assert_eq!(history[0].source, None);
    assert_eq!(history[0].destination, Some(account.id));
    assert_eq!(history[0].description, "Loan issued with interest 12.00%");

    assert_eq!(bank.ctx.loan_service.get_loan(loan.id).unwrap(), loan);
    bank.assert_healthy();
}

#[test]
fn test_take_loan_requires_account_owner() {
    let bank = bank();
    let account = bank.account(1, "0");

    let err = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(2), account.id, dec("1000"))
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
    assert_eq!(bank.balance(&account), Decimal::ZERO);
    assert!(bank.ctx.loan_service.get_user_loans(UserId(2)).unwrap().is_empty());
}

#[test]
fn test_operator_issues_loan_to_account_owner() {
    let bank = bank();
    let account = bank.account(7, "0");

    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::Operator, account.id, dec("50"))
        .unwrap();
    assert_eq!(loan.user, UserId(7));
}

#[test]
fn test_take_loan_rejects_bad_amount() {
    let bank = bank();
    let account = bank.account(1, "0");

    let err = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, Decimal::ZERO)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAmount(_)));
}

#[test]
fn test_rate_unavailable_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    let ctx = BankContext::with_config(dir.path(), Config::default(), Arc::new(UnreachableRates))
        .unwrap();
    let account = ctx
        .ledger_service
        .create_account(&Principal::user(1), UserId(1))
        .unwrap();

    let err = ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("100"))
        .unwrap_err();

    assert!(matches!(err, Error::RateUnavailable(_)));
    assert_eq!(ctx.ledger_service.get_balance(account.id).unwrap(), Decimal::ZERO);
    assert!(ctx.loan_service.get_user_loans(UserId(1)).unwrap().is_empty());
    assert!(ctx.transaction_log_service.get_history(account.id).unwrap().is_empty());
}

// ============================================================================
// Accrual
// ============================================================================

#[test]
fn test_debt_accrues_simple_interest() {
    let bank = bank();
    let account = bank.account(1, "0");
    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("1000"))
        .unwrap();

    let service = &bank.ctx.loan_service;
    assert_eq!(
        service.outstanding_debt_at(loan.id, loan.start_date).unwrap(),
        dec("1000")
    );
    assert_eq!(
        service
            .outstanding_debt_at(loan.id, loan.start_date + Duration::days(365))
            .unwrap(),
        dec("1120")
    );
    assert_eq!(
        service
            .outstanding_debt_at(loan.id, loan.start_date + Duration::days(73))
            .unwrap(),
        dec("1024")
    );
}

#[test]
fn test_partial_payment_counts_against_accrued_debt() {
    let bank = bank();
    let account = bank.account(1, "0");
    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("1000"))
        .unwrap();

    bank.ctx
        .loan_service
        .repay_partial(&Principal::user(1), loan.id, dec("500"))
        .unwrap();

    // 1000 * (1 + 0.12) - 500
    assert_eq!(
        bank.ctx
            .loan_service
            .outstanding_debt_at(loan.id, loan.start_date + Duration::days(365))
            .unwrap(),
        dec("620.00")
    );
}

#[test]
fn test_debt_of_unknown_loan() {
    let bank = bank();
    let err = bank.ctx.loan_service.outstanding_debt(LoanId(3)).unwrap_err();
    assert!(matches!(err, Error::LoanNotFound(LoanId(3))));
    let err = bank.ctx.loan_service.get_payments(LoanId(3)).unwrap_err();
    assert!(matches!(err, Error::LoanNotFound(LoanId(3))));
}

// ============================================================================
// Repayment
// ============================================================================

#[test]
fn test_repay_loan_settles_debt() {
    let bank = bank();
    let account = bank.account(1, "500");
    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("1000"))
        .unwrap();

    let repayment = bank
        .ctx
        .loan_service
        .repay_loan(&Principal::user(1), loan.id)
        .unwrap();

    assert_eq!(repayment.amount_paid, dec("1000"));
    assert_eq!(repayment.remaining, Decimal::ZERO);
    assert_eq!(repayment.loan.state, LoanState::Repaid);
    assert!(repayment.loan.next_payment_due.is_some());
    assert_eq!(bank.balance(&account), dec("500"));

    let tx = repayment.transaction.unwrap();
    assert_eq!(tx.kind, TransactionKind::CreditPayment);
    assert_eq!(tx.source, Some(account.id));
    assert_eq!(tx.destination, None);
    assert_eq!(tx.description, format!("Repayment for loan ID {}", loan.id));

    let payments = bank.ctx.loan_service.get_payments(loan.id).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, dec("1000"));
    assert_eq!(
        bank.ctx.loan_service.outstanding_debt(loan.id).unwrap(),
        Decimal::ZERO
    );
    bank.assert_healthy();
}

#[test]
fn test_repay_settled_loan_is_a_no_op() {
    let bank = bank();
    let account = bank.account(1, "500");
    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("100"))
        .unwrap();
    bank.ctx
        .loan_service
        .repay_loan(&Principal::user(1), loan.id)
        .unwrap();
    let balance = bank.balance(&account);

    let again = bank
        .ctx
        .loan_service
        .repay_loan(&Principal::user(1), loan.id)
        .unwrap();

    assert_eq!(again.amount_paid, Decimal::ZERO);
    assert!(again.transaction.is_none());
    assert_eq!(again.loan.state, LoanState::Repaid);
    assert_eq!(bank.balance(&account), balance);
    assert_eq!(bank.ctx.loan_service.get_payments(loan.id).unwrap().len(), 1);
}

#[test]
fn test_settled_loans_stay_settled_as_time_passes() {
    let bank = bank();
    let alice = bank.account(1, "500");
    let bob = bank.account(2, "0");
    let paid = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), alice.id, dec("1000"))
        .unwrap();
    let written_off = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(2), bob.id, dec("1000"))
        .unwrap();
    let repayment = bank
        .ctx
        .loan_service
        .repay_loan(&Principal::user(1), paid.id)
        .unwrap();
    assert!(repayment.loan.repaid_at.is_some());
    bank.ctx
        .loan_service
        .mark_as_repaid(&Principal::Operator, written_off.id)
        .unwrap();

    let bank = bank.age_loans(30);

    // The formula keeps accruing on the principal after settlement
    assert!(bank.ctx.loan_service.outstanding_debt(paid.id).unwrap() > Decimal::ZERO);

    let report = bank.ctx.doctor_service.run_checks().unwrap();
    assert!(report.is_healthy());
    let check = &report.checks["repaid_loans_with_debt"];
    assert_eq!(check.status, "warning");
    let details = check.details.as_ref().unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0]["loan_id"], written_off.id.get());
    assert_eq!(dec(details[0]["remaining"].as_str().unwrap()), dec("1000"));
}

#[test]
fn test_repay_without_funds() {
    let bank = bank();
    let account = bank.account(1, "0");
    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("100"))
        .unwrap();
    bank.ctx
        .ledger_service
        .withdraw(&Principal::user(1), account.id, dec("60"), "")
        .unwrap();

    let err = bank
        .ctx
        .loan_service
        .repay_loan(&Principal::user(1), loan.id)
        .unwrap_err();

    assert!(matches!(err, Error::InsufficientFunds { .. }));
    assert_eq!(bank.balance(&account), dec("40"));
    assert!(bank.ctx.loan_service.get_payments(loan.id).unwrap().is_empty());
    let loan = bank.ctx.loan_service.get_loan(loan.id).unwrap();
    assert_eq!(loan.state, LoanState::Active);
    assert_eq!(loan.next_payment_due, None);
}

#[test]
fn test_only_borrower_may_repay() {
    let bank = bank();
    let account = bank.account(1, "100");
    bank.account(2, "100");
    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("100"))
        .unwrap();

    let err = bank
        .ctx
        .loan_service
        .repay_loan(&Principal::user(2), loan.id)
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
    assert_eq!(bank.balance(&account), dec("200"));
}

#[test]
fn test_partial_repayments_are_ledger_only() {
    let bank = bank();
    let account = bank.account(1, "0");
    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("1000"))
        .unwrap();

    let payment = bank
        .ctx
        .loan_service
        .repay_partial(&Principal::user(1), loan.id, dec("400"))
        .unwrap();

    assert_eq!(payment.loan, loan.id);
    assert_eq!(payment.amount, dec("400"));
    assert_eq!(bank.balance(&account), dec("1000"));
    assert_eq!(
        bank.ctx
            .loan_service
            .outstanding_debt_at(loan.id, loan.start_date)
            .unwrap(),
        dec("600")
    );

    // Covering the rest with partials leaves nothing for a full repayment
    bank.ctx
        .loan_service
        .repay_partial(&Principal::user(1), loan.id, dec("600"))
        .unwrap();
    let repayment = bank
        .ctx
        .loan_service
        .repay_loan(&Principal::user(1), loan.id)
        .unwrap();
    assert_eq!(repayment.amount_paid, Decimal::ZERO);
    assert_eq!(repayment.loan.state, LoanState::Repaid);
    assert_eq!(bank.balance(&account), dec("1000"));
}

#[test]
fn test_partial_repayment_validation() {
    let bank = bank();
    let account = bank.account(1, "0");
    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("100"))
        .unwrap();

    let err = bank
        .ctx
        .loan_service
        .repay_partial(&Principal::user(1), loan.id, dec("-1"))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAmount(_)));

    let err = bank
        .ctx
        .loan_service
        .repay_partial(&Principal::user(2), loan.id, dec("1"))
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));

    let err = bank
        .ctx
        .loan_service
        .repay_partial(&Principal::user(1), LoanId(99), dec("1"))
        .unwrap_err();
    assert!(matches!(err, Error::LoanNotFound(LoanId(99))));
}

// ============================================================================
// Administrative settlement
// ============================================================================

#[test]
fn test_mark_as_repaid_requires_operator() {
    let bank = bank();
    let account = bank.account(1, "0");
    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("100"))
        .unwrap();

    let err = bank
        .ctx
        .loan_service
        .mark_as_repaid(&Principal::user(1), loan.id)
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
    assert_eq!(
        bank.ctx.loan_service.get_loan(loan.id).unwrap().state,
        LoanState::Active
    );
}

#[test]
fn test_marked_loan_refuses_payments() {
    let bank = bank();
    let account = bank.account(1, "0");
    let loan = bank
        .ctx
        .loan_service
        .take_loan(&Principal::user(1), account.id, dec("100"))
        .unwrap();

    let marked = bank
        .ctx
        .loan_service
        .mark_as_repaid(&Principal::Operator, loan.id)
        .unwrap();
    assert_eq!(marked.state, LoanState::Repaid);

    // Idempotent
    bank.ctx
        .loan_service
        .mark_as_repaid(&Principal::Operator, loan.id)
        .unwrap();

    let err = bank
        .ctx
        .loan_service
        .repay_loan(&Principal::user(1), loan.id)
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRepaid(_)));
    let err = bank
        .ctx
        .loan_service
        .repay_partial(&Principal::user(1), loan.id, dec("10"))
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyRepaid(_)));
    assert_eq!(bank.balance(&account), dec("100"));

    let report = bank.ctx.doctor_service.run_checks().unwrap();
    assert!(report.is_healthy());
    assert_eq!(report.checks["repaid_loans_with_debt"].status, "warning");
}

#[test]
fn test_mark_unknown_loan() {
    let bank = bank();
    let err = bank
        .ctx
        .loan_service
        .mark_as_repaid(&Principal::Operator, LoanId(8))
        .unwrap_err();
    assert!(matches!(err, Error::LoanNotFound(LoanId(8))));
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_user_loans() {
    let bank = bank();
    let alice = bank.account(1, "0");
    let bob = bank.account(2, "0");
    let loans = &bank.ctx.loan_service;

    let first = loans.take_loan(&Principal::user(1), alice.id, dec("10")).unwrap();
    let second = loans.take_loan(&Principal::user(1), alice.id, dec("20")).unwrap();
    loans.take_loan(&Principal::user(2), bob.id, dec("30")).unwrap();

    let alice_loans = loans.get_user_loans(UserId(1)).unwrap();
    let ids: Vec<_> = alice_loans.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert!(loans.get_user_loans(UserId(3)).unwrap().is_empty());
}
