//! Transaction log domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{AccountId, TransactionId};
use super::result::{Error, Result};

/// Kind of balance-affecting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    Transfer,
    CreditPayment,
    Reversal,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 5] = [
        Self::Deposit,
        Self::Withdraw,
        Self::Transfer,
        Self::CreditPayment,
        Self::Reversal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::Transfer => "transfer",
            Self::CreditPayment => "credit_payment",
            Self::Reversal => "reversal",
        }
    }

    /// Kinds that move money out of a customer account and can be undone
    pub fn is_reversible(&self) -> bool {
        matches!(self, Self::Transfer | Self::Withdraw | Self::CreditPayment)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::database(format!("unknown transaction kind '{}'", s)))
    }
}

/// One immutable row of the transaction log
///
/// `source` is `None` for money entering the bank (deposits, loan issue),
/// `destination` is `None` for money leaving it (withdrawals, repayments).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub source: Option<AccountId>,
    pub destination: Option<AccountId>,
    /// Always a positive magnitude; direction comes from the endpoints
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub is_reversal: bool,
    pub reversal_of: Option<TransactionId>,
}

impl Transaction {
    /// Whether `account` is either endpoint of this transaction
    pub fn touches(&self, account: AccountId) -> bool {
        self.source == Some(account) || self.destination == Some(account)
    }

    /// Compute the compensating movement for this transaction
    ///
    /// The reversal moves the same magnitude with the endpoints swapped,
    /// and both swapped endpoints have to be real accounts.
    pub fn reversal_plan(&self) -> Result<ReversalPlan> {
        if !self.kind.is_reversible() {
            return Err(Error::NonReversibleTransactionType {
                id: self.id,
                kind: self.kind,
                reason: "only transfer, withdraw and credit_payment can be reversed".to_string(),
            });
        }
        match (self.destination, self.source) {
            (Some(source), Some(destination)) => Ok(ReversalPlan {
                original: self.id,
                source,
                destination,
                amount: self.amount.abs(),
            }),
            _ => Err(Error::NonReversibleTransactionType {
                id: self.id,
                kind: self.kind,
                reason: "reversal requires both source and destination accounts".to_string(),
            }),
        }
    }
}

/// Compensating movement derived from an original transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReversalPlan {
    pub original: TransactionId,
    /// The original destination, debited by the reversal
    pub source: AccountId,
    /// The original source, credited by the reversal
    pub destination: AccountId,
    pub amount: Decimal,
}

impl ReversalPlan {
    pub fn describe(&self, description: &str) -> String {
        if description.is_empty() {
            format!("Reversal of transaction {}", self.original)
        } else {
            format!("Reversal of transaction {}: {}", self.original, description)
        }
    }
}

/// A transaction about to be appended; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub source: Option<AccountId>,
    pub destination: Option<AccountId>,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub description: String,
    pub reversal_of: Option<TransactionId>,
}

impl NewTransaction {
    pub fn deposit(to: AccountId, amount: Decimal, description: impl Into<String>) -> Self {
        Self::movement(None, Some(to), amount, TransactionKind::Deposit, description)
    }

    pub fn withdraw(from: AccountId, amount: Decimal, description: impl Into<String>) -> Self {
        Self::movement(Some(from), None, amount, TransactionKind::Withdraw, description)
    }

    pub fn transfer(
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self::movement(Some(from), Some(to), amount, TransactionKind::Transfer, description)
    }

    /// Bank-directed debit, e.g. a loan repayment
    pub fn credit_payment(from: AccountId, amount: Decimal, description: impl Into<String>) -> Self {
        Self::movement(Some(from), None, amount, TransactionKind::CreditPayment, description)
    }

    /// Loan disbursement into the borrower's account
    pub fn loan_issue(to: AccountId, amount: Decimal, description: impl Into<String>) -> Self {
        Self::movement(None, Some(to), amount, TransactionKind::CreditPayment, description)
    }

    pub fn reversal(plan: &ReversalPlan, description: &str) -> Self {
        Self {
            source: Some(plan.source),
            destination: Some(plan.destination),
            amount: plan.amount,
            kind: TransactionKind::Reversal,
            description: plan.describe(description),
            reversal_of: Some(plan.original),
        }
    }

    fn movement(
        source: Option<AccountId>,
        destination: Option<AccountId>,
        amount: Decimal,
        kind: TransactionKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            source,
            destination,
            amount,
            kind,
            description: description.into(),
            reversal_of: None,
        }
    }

    pub fn is_reversal(&self) -> bool {
        self.kind == TransactionKind::Reversal
    }
}
