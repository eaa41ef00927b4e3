//! Money movement commands - deposit, withdraw, transfer, pay, reverse

use anyhow::Result;
use rust_decimal::Decimal;

use super::{get_context, report};
use crate::output;
use ledger_core::{AccountId, Principal, Transaction, TransactionId};

fn committed(tx: &Transaction) {
    output::success(&output::describe_transaction(tx));
}

pub fn deposit(
    principal: &Principal,
    to: AccountId,
    amount: Decimal,
    description: &str,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let result = ctx
        .ledger_service
        .deposit(principal, to, amount, description);
    report("deposit", result, json, committed)
}

pub fn withdraw(
    principal: &Principal,
    from: AccountId,
    amount: Decimal,
    description: &str,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let result = ctx
        .ledger_service
        .withdraw(principal, from, amount, description);
    report("withdraw", result, json, committed)
}

pub fn transfer(
    principal: &Principal,
    from: AccountId,
    to: AccountId,
    amount: Decimal,
    description: &str,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let result = ctx
        .ledger_service
        .transfer(principal, from, to, amount, description);
    report("transfer", result, json, committed)
}

pub fn pay(
    principal: &Principal,
    from: AccountId,
    amount: Decimal,
    description: &str,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let result = ctx
        .ledger_service
        .credit_payment(principal, from, amount, description);
    report("credit_payment", result, json, committed)
}

pub fn reverse(
    principal: &Principal,
    id: TransactionId,
    description: &str,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let result = ctx
        .transaction_log_service
        .reverse(principal, id, description);
    report("reverse", result, json, committed)
}
