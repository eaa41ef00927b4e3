//! CLI command implementations

pub mod account;
pub mod doctor;
pub mod loan;
pub mod logs;
pub mod money;
pub mod status;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use ledger_core::{BankContext, EntryPoint, LogEvent, LoggingService, OperationResult};

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger() -> Option<LoggingService> {
    let ledger_dir = get_ledger_dir().ok()?;
    std::fs::create_dir_all(&ledger_dir).ok()?;
    LoggingService::new(&ledger_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION")).ok()
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<LoggingService>, event: LogEvent) {
    if let Some(l) = logger {
        if let Err(e) = l.log(event) {
            tracing::debug!(error = %e, "failed to write event log");
        }
    }
}

/// Ledger directory from `LEDGER_DIR`, or `~/.ledger`
pub fn get_ledger_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("LEDGER_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".ledger"))
        .ok_or_else(|| anyhow!("Could not find home directory; set LEDGER_DIR"))
}

pub fn get_context() -> Result<BankContext> {
    let ledger_dir = get_ledger_dir()?;
    BankContext::new(&ledger_dir).context("Failed to open the ledger")
}

/// Log the outcome of a core operation, then render it
///
/// With `json` the result is printed as an `OperationResult` envelope, on
/// failure too. Errors are still returned so the exit code reflects them.
pub fn report<T: Serialize>(
    operation: &str,
    result: ledger_core::domain::result::Result<T>,
    json: bool,
    render: impl FnOnce(&T),
) -> Result<()> {
    let logger = get_logger();
    log_event(&logger, LogEvent::operation(operation, &result));

    match result {
        Ok(value) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&OperationResult::ok(&value))?);
            } else {
                render(&value);
            }
            Ok(())
        }
        Err(e) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&OperationResult::<T>::fail(&e))?
                );
            }
            Err(e.into())
        }
    }
}
