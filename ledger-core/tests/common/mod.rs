//! Shared helpers for the integration tests
//!
//! Every test gets its own on-disk ledger in a temp directory.

#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use tempfile::TempDir;

use ledger_core::adapters::rates::FixedRateProvider;
use ledger_core::config::Config;
use ledger_core::{Account, BankContext, Principal, UserId, LEDGER_DB_FILE};

/// Annual rate quoted by the test rate provider, in percent
pub const TEST_RATE: i64 = 12;

pub struct TestBank {
    pub ctx: BankContext,
    // Keeps the directory alive for the duration of the test
    pub dir: TempDir,
}

pub fn bank() -> TestBank {
    bank_with(Config::default())
}

pub fn bank_with(config: Config) -> TestBank {
    let dir = TempDir::new().unwrap();
    let ctx = open(&dir, config);
    TestBank { ctx, dir }
}

fn open(dir: &TempDir, config: Config) -> BankContext {
    let rates = Arc::new(FixedRateProvider::new(Decimal::from(TEST_RATE)));
    BankContext::with_config(dir.path(), config, rates).unwrap()
}

/// Config tuned for heavy contention
pub fn contention_config() -> Config {
    let mut config = Config::default();
    config.ledger.max_retries = 500;
    config.ledger.retry_base_delay_ms = 1;
    config
}

pub fn dec(value: &str) -> Decimal {
    value.parse().unwrap()
}

impl TestBank {
    /// Open an account for `user` and fund it with `balance`
    pub fn account(&self, user: i64, balance: &str) -> Account {
        let account = self
            .ctx
            .ledger_service
            .create_account(&Principal::Operator, UserId(user))
            .unwrap();
        let balance = dec(balance);
        if balance > Decimal::ZERO {
            self.ctx
                .ledger_service
                .deposit(&Principal::Operator, account.id, balance, "opening balance")
                .unwrap();
        }
        self.ctx.ledger_service.get_account(account.id).unwrap()
    }

    pub fn balance(&self, account: &Account) -> Decimal {
        self.ctx.ledger_service.get_balance(account.id).unwrap()
    }

    /// Close the ledger, move every loan and loan payment `days` into the past, reopen
    pub fn age_loans(self, days: i64) -> TestBank {
        let TestBank { ctx, dir } = self;
        let config = ctx.config.clone();
        drop(ctx);

        let shift = chrono::Duration::days(days).num_microseconds().unwrap();
        let conn = duckdb::Connection::open(dir.path().join(LEDGER_DB_FILE)).unwrap();
        conn.execute_batch(&format!(
            "UPDATE loans SET
                 start_date = start_date - {shift},
                 next_payment_due = next_payment_due - {shift},
                 repaid_at = repaid_at - {shift},
                 created_at = created_at - {shift},
                 updated_at = updated_at - {shift};
             UPDATE loan_payments SET paid_at = paid_at - {shift};"
        ))
        .unwrap();
        drop(conn);

        let ctx = open(&dir, config);
        TestBank { ctx, dir }
    }

    /// Doctor must find nothing wrong
    pub fn assert_healthy(&self) {
        let report = self.ctx.doctor_service.run_checks().unwrap();
        assert!(report.is_healthy(), "doctor found problems: {:?}", report.checks);
    }
}
