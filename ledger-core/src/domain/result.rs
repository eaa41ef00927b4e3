//! Result and error types for the core library

use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::{AccountId, LoanId, TransactionId, UserId};
use super::transaction::TransactionKind;

/// Core library error type
///
/// Validation variants are raised before any state is touched. Storage
/// failures abort the surrounding unit of work, so no variant is ever
/// returned alongside a partially applied change.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient funds in account {account}: need {needed}, available {available}")]
    InsufficientFunds {
        account: AccountId,
        needed: Decimal,
        available: Decimal,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("User {0} already has an account")]
    AccountAlreadyExists(UserId),

    #[error("Source and destination are the same account: {0}")]
    SameAccount(AccountId),

    #[error("Loan not found: {0}")]
    LoanNotFound(LoanId),

    #[error("Loan {0} is already repaid")]
    AlreadyRepaid(LoanId),

    #[error("Transaction {id} ({kind}) cannot be reversed: {reason}")]
    NonReversibleTransactionType {
        id: TransactionId,
        kind: TransactionKind,
        reason: String,
    },

    #[error("Transaction {original} was already reversed by transaction {reversal}")]
    AlreadyReversed {
        original: TransactionId,
        reversal: TransactionId,
    },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Interest rate unavailable: {0}")]
    RateUnavailable(String),

    #[error("Concurrent update conflict, gave up after {attempts} attempt(s)")]
    ConcurrencyConflict { attempts: u32 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Operation cancelled before commit")]
    Cancelled,

    #[error("Operation timed out before commit")]
    Timeout,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid amount error
    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    /// The machine-readable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount(_) => ErrorKind::InvalidAmount,
            Self::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            Self::AccountNotFound(_) => ErrorKind::AccountNotFound,
            Self::AccountAlreadyExists(_) => ErrorKind::AccountAlreadyExists,
            Self::SameAccount(_) => ErrorKind::SameAccount,
            Self::LoanNotFound(_) => ErrorKind::LoanNotFound,
            Self::AlreadyRepaid(_) => ErrorKind::AlreadyRepaid,
            Self::NonReversibleTransactionType { .. } => ErrorKind::NonReversibleTransactionType,
            Self::AlreadyReversed { .. } => ErrorKind::AlreadyReversed,
            Self::TransactionNotFound(_) => ErrorKind::TransactionNotFound,
            Self::RateUnavailable(_) => ErrorKind::RateUnavailable,
            Self::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout => ErrorKind::Timeout,
            Self::Database(_) => ErrorKind::Database,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Json(_) => ErrorKind::Json,
        }
    }

    /// Only optimistic concurrency conflicts may be retried by a caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Error kinds, stable across versions and safe to persist in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidAmount,
    InsufficientFunds,
    AccountNotFound,
    AccountAlreadyExists,
    SameAccount,
    LoanNotFound,
    AlreadyRepaid,
    NonReversibleTransactionType,
    AlreadyReversed,
    TransactionNotFound,
    RateUnavailable,
    ConcurrencyConflict,
    Unauthorized,
    Cancelled,
    Timeout,
    Database,
    Config,
    Io,
    Json,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidAmount => "invalid_amount",
            Self::InsufficientFunds => "insufficient_funds",
            Self::AccountNotFound => "account_not_found",
            Self::AccountAlreadyExists => "account_already_exists",
            Self::SameAccount => "same_account",
            Self::LoanNotFound => "loan_not_found",
            Self::AlreadyRepaid => "already_repaid",
            Self::NonReversibleTransactionType => "non_reversible_transaction_type",
            Self::AlreadyReversed => "already_reversed",
            Self::TransactionNotFound => "transaction_not_found",
            Self::RateUnavailable => "rate_unavailable",
            Self::ConcurrencyConflict => "concurrency_conflict",
            Self::Unauthorized => "unauthorized",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
            Self::Database => "database",
            Self::Config => "config",
            Self::Io => "io",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Operation result envelope for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub context: Option<HashMap<String, serde_json::Value>>,
}

impl<T> OperationResult<T> {
    /// Create a successful result
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            context: None,
        }
    }

    /// Create a failed result from a core error
    pub fn fail(error: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            context: None,
        }
    }

    /// Attach context to the result
    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = Some(context);
        self
    }
}

impl<T> From<Result<T>> for OperationResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::fail(&e),
        }
    }
}
