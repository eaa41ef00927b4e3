//! Cancellation, deadlines and the async facade
//!
//! A unit of work that is cancelled or past its deadline before commit must
//! leave balances and the transaction log untouched.
//!
//! Run with: cargo test --test cancellation_test -- --nocapture

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use common::{bank, bank_with, contention_config, dec};
use ledger_core::config::Config;
use ledger_core::{CancelToken, Error, OperationScope, Principal, UserId};

// ============================================================================
// Scoped services
// ============================================================================

#[test]
fn test_cancelled_scope_applies_nothing() {
    let bank = bank();
    let alice = bank.account(1, "100");
    let bob = bank.account(2, "0");

    let token = CancelToken::new();
    assert!(token.cancel());
    let ledger = bank
        .ctx
        .ledger_service
        .scoped(OperationScope::unbounded().with_cancel(token));

    let err = ledger
        .transfer(&Principal::user(1), alice.id, bob.id, dec("10"), "")
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(bank.balance(&alice), dec("100"));
    assert_eq!(bank.balance(&bob), Decimal::ZERO);
    assert_eq!(
        bank.ctx.transaction_log_service.get_history(alice.id).unwrap().len(),
        1
    );
}

#[test]
fn test_expired_deadline_applies_nothing() {
    let bank = bank();
    let account = bank.account(1, "100");

    let ledger = bank
        .ctx
        .ledger_service
        .scoped(OperationScope::unbounded().with_timeout(Duration::ZERO));
    let err = ledger
        .withdraw(&Principal::user(1), account.id, dec("10"), "")
        .unwrap_err();

    assert!(matches!(err, Error::Timeout));
    assert_eq!(bank.balance(&account), dec("100"));
}

#[test]
fn test_cancelled_loan_issue_leaves_no_loan() {
    let bank = bank();
    let account = bank.account(1, "0");

    let token = CancelToken::new();
    token.cancel();
    let loans = bank
        .ctx
        .loan_service
        .scoped(OperationScope::unbounded().with_cancel(token));
    let err = loans
        .take_loan(&Principal::user(1), account.id, dec("100"))
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(bank.ctx.loan_service.get_user_loans(UserId(1)).unwrap().is_empty());
    assert_eq!(bank.balance(&account), Decimal::ZERO);
}

#[test]
fn test_configured_timeout_reaches_services() {
    let mut config = Config::default();
    config.ledger.operation_timeout_ms = Some(0);
    let bank = bank_with(config);

    let err = bank
        .ctx
        .ledger_service
        .create_account(&Principal::user(1), UserId(1))
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert!(bank.ctx.ledger_service.list_accounts().unwrap().is_empty());
}

// ============================================================================
// Async facade
// ============================================================================

#[tokio::test]
async fn test_async_round_trip() {
    let bank = bank();
    let alice = bank.account(1, "100");
    let bob = bank.account(2, "0");
    let facade = bank.ctx.async_bank();

    let tx = facade
        .transfer(Principal::user(1), alice.id, bob.id, dec("25"), "async".to_string())
        .await
        .unwrap();
    assert_eq!(facade.get_balance(bob.id).await.unwrap(), dec("25"));
    assert_eq!(facade.get_transaction(tx.id).await.unwrap(), tx);

    let reversal = facade
        .reverse_transaction(Principal::user(2), tx.id, String::new())
        .await
        .unwrap();
    assert_eq!(reversal.reversal_of, Some(tx.id));
    assert_eq!(facade.get_balance(alice.id).await.unwrap(), dec("100"));

    let history = facade.get_history(alice.id).await.unwrap();
    assert_eq!(history.len(), 3);
}

#[tokio::test]
async fn test_async_loan_lifecycle() {
    let bank = bank();
    let account = bank.account(1, "50");
    let facade = bank.ctx.async_bank();

    let loan = facade
        .take_loan(Principal::user(1), account.id, dec("100"))
        .await
        .unwrap();
    assert_eq!(facade.get_outstanding_debt(loan.id).await.unwrap(), dec("100"));
    facade
        .repay_partial_loan(Principal::user(1), loan.id, dec("30"))
        .await
        .unwrap();

    let repayment = facade.repay_loan(Principal::user(1), loan.id).await.unwrap();
    assert_eq!(repayment.amount_paid, dec("70"));
    assert_eq!(facade.get_balance(account.id).await.unwrap(), dec("80"));
    assert!(facade.get_loan(loan.id).await.unwrap().is_repaid());
    assert_eq!(facade.get_user_loans(UserId(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_async_errors_pass_through() {
    let bank = bank();
    let account = bank.account(1, "10");
    let facade = bank.ctx.async_bank();

    let err = facade
        .withdraw(Principal::user(1), account.id, dec("11"), String::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds { .. }));

    let err = facade
        .mark_loan_as_repaid(Principal::user(1), ledger_core::LoanId(1))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

/// A zero timeout gives up before the work can commit
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_timeout_rolls_back() {
    let bank = bank();
    let account = bank.account(1, "100");
    let facade = bank
        .ctx
        .async_bank()
        .with_timeout(Some(Duration::ZERO));

    let err = facade
        .withdraw(Principal::user(1), account.id, dec("10"), String::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout), "got {:?}", err);

    // Give the abandoned blocking task time to observe the cancellation
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bank.balance(&account), dec("100"));
}

/// Either the whole call commits or nothing does, whichever side wins the race
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dropped_calls_are_all_or_nothing() {
    let bank = Arc::new(bank_with(contention_config()));
    let account = bank.account(1, "1000");
    let facade = bank.ctx.async_bank();

    let mut committed = 0;
    for _ in 0..20 {
        let call = facade.withdraw(Principal::user(1), account.id, dec("1"), String::new());
        match tokio::time::timeout(Duration::from_micros(200), call).await {
            Ok(Ok(_)) => committed += 1,
            Ok(Err(Error::Timeout)) | Err(_) => {}
            Ok(Err(other)) => panic!("unexpected error: {:?}", other),
        }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let history = bank.ctx.transaction_log_service.get_history(account.id).unwrap();
    let withdrawals = history.len() as i64 - 1;
    assert!(withdrawals >= committed);
    assert_eq!(
        bank.balance(&account),
        dec("1000") - Decimal::from(withdrawals)
    );
    bank.assert_healthy();
}
