//! Doctor service - ledger integrity checks

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

use crate::adapters::duckdb::DuckDbStore;
use crate::domain::loan::outstanding_debt;
use crate::domain::result::Result;

/// Doctor service for integrity checks
pub struct DoctorService {
    store: Arc<DuckDbStore>,
}

impl DoctorService {
    pub fn new(store: Arc<DuckDbStore>) -> Self {
        Self { store }
    }

    /// Run all checks
    pub fn run_checks(&self) -> Result<DoctorResult> {
        let mut checks = HashMap::new();

        let negative = self.store.negative_balances()?;
        checks.insert(
            "negative_balances".to_string(),
            CheckResult::from_findings(
                "error",
                "No account has a negative balance".to_string(),
                format!("{} account(s) have a negative balance", negative.len()),
                negative.iter().map(|id| json!({ "account_id": id.get() })).collect(),
            ),
        );

        // Stored balances against the sum of logged movements
        let mismatches = self.store.balance_mismatches()?;
        checks.insert(
            "balance_reconciliation".to_string(),
            CheckResult::from_findings(
                "error",
                "All balances match the transaction log".to_string(),
                format!(
                    "{} account balance(s) disagree with the transaction log",
                    mismatches.len()
                ),
                mismatches
                    .iter()
                    .map(|m| {
                        json!({
                            "account_id": m.account.get(),
                            "stored": m.stored.to_string(),
                            "derived": m.derived.to_string(),
                        })
                    })
                    .collect(),
            ),
        );

        let orphaned_loans = self.store.orphaned_loans()?;
        checks.insert(
            "orphaned_loans".to_string(),
            CheckResult::from_findings(
                "error",
                "No orphaned loans found".to_string(),
                format!("{} loan(s) reference missing accounts", orphaned_loans.len()),
                orphaned_loans.iter().map(|id| json!({ "loan_id": id.get() })).collect(),
            ),
        );

        let orphaned_txs = self.store.orphaned_transactions()?;
        checks.insert(
            "orphaned_transactions".to_string(),
            CheckResult::from_findings(
                "error",
                "No orphaned transactions found".to_string(),
                format!(
                    "{} transaction(s) reference missing accounts or originals",
                    orphaned_txs.len()
                ),
                orphaned_txs
                    .iter()
                    .map(|id| json!({ "transaction_id": id.get() }))
                    .collect(),
            ),
        );

        let malformed = self.store.malformed_transactions()?;
        checks.insert(
            "malformed_transactions".to_string(),
            CheckResult::from_findings(
                "error",
                "All transactions are well-formed".to_string(),
                format!("{} transaction(s) have an unknown kind or bad amount", malformed.len()),
                malformed
                    .iter()
                    .map(|id| json!({ "transaction_id": id.get() }))
                    .collect(),
            ),
        );

        // Operators may settle a loan with debt left; flag it, it is not corruption.
        // Interest keeps accruing on paper after settlement, so the debt is
        // evaluated at the settlement instant.
        let mut settled_with_debt = Vec::new();
        for loan in self.store.all_loans()?.into_iter().filter(|l| l.is_repaid()) {
            let settled_at = loan.repaid_at.unwrap_or(loan.updated_at);
            let debt = outstanding_debt(&loan, self.store.loan_payments_total(loan.id)?, settled_at);
            if debt > Decimal::ZERO {
                settled_with_debt.push(json!({
                    "loan_id": loan.id.get(),
                    "remaining": debt.to_string(),
                }));
            }
        }
        checks.insert(
            "repaid_loans_with_debt".to_string(),
            CheckResult::from_findings(
                "warning",
                "Every repaid loan is fully paid".to_string(),
                format!(
                    "{} loan(s) were marked repaid with debt remaining",
                    settled_with_debt.len()
                ),
                settled_with_debt,
            ),
        );

        let passed = checks.values().filter(|c| c.status == "pass").count() as i64;
        let warnings = checks.values().filter(|c| c.status == "warning").count() as i64;
        let errors = checks.values().filter(|c| c.status == "error").count() as i64;

        Ok(DoctorResult {
            checks,
            summary: DoctorSummary {
                passed,
                warnings,
                errors,
            },
        })
    }
}

#[derive(Debug, Serialize)]
pub struct DoctorResult {
    pub checks: HashMap<String, CheckResult>,
    pub summary: DoctorSummary,
}

impl DoctorResult {
    pub fn is_healthy(&self) -> bool {
        self.summary.errors == 0
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<serde_json::Value>>,
}

impl CheckResult {
    /// "pass" when nothing was found, `severity` otherwise
    fn from_findings(
        severity: &str,
        pass_message: String,
        fail_message: String,
        findings: Vec<serde_json::Value>,
    ) -> Self {
        if findings.is_empty() {
            Self {
                status: "pass".to_string(),
                message: pass_message,
                details: None,
            }
        } else {
            Self {
                status: severity.to_string(),
                message: fail_message,
                details: Some(findings),
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DoctorSummary {
    pub passed: i64,
    pub warnings: i64,
    pub errors: i64,
}
