//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and the store. Each service focuses on
//! one component of the ledger; all of them share one `DuckDbStore`.

pub mod access;
mod doctor;
mod ledger;
mod loan;
pub mod logging;
pub mod migration;
mod status;
mod transaction_log;

pub use doctor::{CheckResult, DoctorResult, DoctorService, DoctorSummary};
pub use ledger::LedgerService;
pub use loan::{LoanService, Repayment};
pub use logging::{EntryPoint, LogEntry, LogEvent, LoggingService, OperationStats, Outcome};
pub use migration::{MigrationResult, MigrationService};
pub use status::{AccountSummary, StatusService, StatusSummary};
pub use transaction_log::TransactionLogService;
