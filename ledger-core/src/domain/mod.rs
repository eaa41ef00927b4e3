//! Core domain entities
//!
//! Pure data structures and the arithmetic over them - no I/O.

mod account;
pub mod ids;
pub mod loan;
pub mod money;
mod principal;
pub mod result;
mod transaction;

pub use account::Account;
pub use ids::{AccountId, LoanId, LoanPaymentId, TransactionId, UserId};
pub use loan::{Loan, LoanPayment, LoanState};
pub use principal::Principal;
pub use transaction::{NewTransaction, ReversalPlan, Transaction, TransactionKind};
