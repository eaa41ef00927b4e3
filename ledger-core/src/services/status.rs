//! Status service - ledger-wide summary

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::adapters::duckdb::DuckDbStore;
use crate::domain::result::Result;

/// Status service for ledger summaries
pub struct StatusService {
    store: Arc<DuckDbStore>,
}

impl StatusService {
    pub fn new(store: Arc<DuckDbStore>) -> Self {
        Self { store }
    }

    /// Get overall status summary
    pub fn get_status(&self) -> Result<StatusSummary> {
        let stats = self.store.stats()?;
        let accounts = self.store.list_accounts()?;

        Ok(StatusSummary {
            total_accounts: stats.accounts,
            total_transactions: stats.transactions,
            total_reversals: stats.reversals,
            total_loans: stats.loans,
            active_loans: stats.active_loans,
            total_balance: stats.total_balance,
            accounts: accounts
                .into_iter()
                .map(|a| AccountSummary {
                    id: a.id.get(),
                    owner: a.owner.get(),
                    balance: a.balance,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub total_accounts: i64,
    pub total_transactions: i64,
    pub total_reversals: i64,
    pub total_loans: i64,
    pub active_loans: i64,
    pub total_balance: Decimal,
    pub accounts: Vec<AccountSummary>,
}

#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub id: i64,
    pub owner: i64,
    pub balance: Decimal,
}
