//! Ledger Core - accounts, transaction log and loan accounting for a bank
//!
//! This crate follows a hexagonal architecture:
//!
//! - **domain**: Core entities (Account, Transaction, Loan) and pure arithmetic
//! - **ports**: Traits for external capabilities (RateProvider)
//! - **services**: Ledger, transaction log and loan engine orchestration
//! - **adapters**: Concrete implementations (DuckDB store, rate providers)

pub mod adapters;
pub mod async_bank;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod scope;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::duckdb::{DuckDbStore, RetryPolicy};
use config::Config;
use ports::RateProvider;
use services::*;

// Re-export commonly used types at crate root
pub use async_bank::AsyncBank;
pub use domain::result::{Error, ErrorKind, OperationResult};
pub use domain::{
    Account, AccountId, Loan, LoanId, LoanPayment, LoanState, Principal, Transaction,
    TransactionId, TransactionKind, UserId,
};
pub use scope::{CancelToken, OperationScope};
pub use services::{EntryPoint, LogEvent, LoggingService};

/// Ledger database file inside the ledger directory
pub const LEDGER_DB_FILE: &str = "ledger.duckdb";

/// Main context for ledger operations
///
/// Holds the store, configuration and all services. Services are cheap to
/// clone and share the store.
pub struct BankContext {
    pub config: Config,
    pub store: Arc<DuckDbStore>,
    pub ledger_service: LedgerService,
    pub transaction_log_service: TransactionLogService,
    pub loan_service: LoanService,
    pub status_service: StatusService,
    pub doctor_service: DoctorService,
}

impl BankContext {
    /// Open the ledger in `ledger_dir` using its settings.json
    pub fn new(ledger_dir: &Path) -> Result<Self> {
        let config = Config::load(ledger_dir)?;
        let rates = adapters::rates::from_settings(&config.rates)
            .context("Failed to set up the interest rate provider")?;
        Self::with_config(ledger_dir, config, rates)
    }

    /// Open the ledger with an explicit configuration and rate provider
    pub fn with_config(
        ledger_dir: &Path,
        config: Config,
        rates: Arc<dyn RateProvider>,
    ) -> Result<Self> {
        std::fs::create_dir_all(ledger_dir)
            .with_context(|| format!("Failed to create {}", ledger_dir.display()))?;

        let db_path = ledger_dir.join(LEDGER_DB_FILE);
        let store = Arc::new(DuckDbStore::open(
            &db_path,
            RetryPolicy::from_settings(&config.ledger),
        )?);
        let migrated = store.ensure_schema()?;
        if !migrated.applied.is_empty() {
            tracing::info!(applied = ?migrated.applied, "ledger schema migrated");
        }

        let scope = match config.ledger.operation_timeout() {
            Some(timeout) => OperationScope::unbounded().with_timeout(timeout),
            None => OperationScope::unbounded(),
        };

        Ok(Self {
            ledger_service: LedgerService::new(Arc::clone(&store), scope.clone()),
            transaction_log_service: TransactionLogService::new(
                Arc::clone(&store),
                scope.clone(),
                config.ledger.reject_repeat_reversals,
            ),
            loan_service: LoanService::new(Arc::clone(&store), scope, rates),
            status_service: StatusService::new(Arc::clone(&store)),
            doctor_service: DoctorService::new(Arc::clone(&store)),
            store,
            config,
        })
    }

    /// Async facade over the same services
    pub fn async_bank(&self) -> AsyncBank {
        AsyncBank::new(
            self.ledger_service.clone(),
            self.transaction_log_service.clone(),
            self.loan_service.clone(),
            self.config.ledger.operation_timeout(),
        )
    }
}
