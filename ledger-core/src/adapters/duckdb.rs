//! DuckDB storage for the ledger
//!
//! A single root connection is opened per database file. Every operation
//! runs on its own clone of it, checked out from an idle pool, so callers
//! never serialize on one lock. DuckDB's MVCC turns overlapping writes into
//! conflict errors, which [`DuckDbStore::atomic`] retries with backoff.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, SubsecRound, Utc};
use duckdb::{params, Connection, Transaction as DbTransaction};
use rand::Rng;
use rust_decimal::Decimal;

use crate::config::LedgerSettings;
use crate::domain::money::{ensure_positive, from_minor_units, to_minor_units};
use crate::domain::result::{Error, Result};
use crate::domain::{
    Account, AccountId, Loan, LoanId, LoanPayment, LoanPaymentId, LoanState, NewTransaction,
    Transaction, TransactionId, TransactionKind, UserId,
};
use crate::scope::OperationScope;
use crate::services::{MigrationResult, MigrationService};

/// Maximum number of retries when the database file is locked at open
const MAX_OPEN_RETRIES: u32 = 5;

/// Initial open retry delay in milliseconds (doubles each retry)
const INITIAL_OPEN_RETRY_DELAY_MS: u64 = 50;

/// Cap on the backoff exponent for write conflicts
const MAX_BACKOFF_EXPONENT: u32 = 6;

/// Idle connections kept for reuse
const MAX_IDLE_CONNECTIONS: usize = 16;

/// Check if an error message indicates a file locking issue that should be retried
fn is_locked_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// Check if an error message is an MVCC write conflict
fn is_conflict_error(err_msg: &str) -> bool {
    err_msg.to_lowercase().contains("conflict")
}

fn is_unique_violation(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("duplicate key") || lower.contains("unique constraint")
}

impl From<duckdb::Error> for Error {
    fn from(err: duckdb::Error) -> Self {
        let msg = err.to_string();
        if is_conflict_error(&msg) {
            Error::ConcurrencyConflict { attempts: 1 }
        } else {
            Error::Database(msg)
        }
    }
}

/// Backoff for units of work that hit a write conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&LedgerSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &LedgerSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            base_delay: settings.retry_base_delay(),
        }
    }

    /// Delay before attempt `attempt + 1`: exponential with up to one base delay of jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let base_ms = self.base_delay.as_millis() as u64;
        let jitter = if base_ms > 0 {
            rand::thread_rng().gen_range(0..=base_ms)
        } else {
            0
        };
        Duration::from_millis(base_ms.saturating_mul(1 << exponent) + jitter)
    }
}

/// Summary counts used by the status service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub accounts: i64,
    pub transactions: i64,
    pub reversals: i64,
    pub loans: i64,
    pub active_loans: i64,
    pub total_balance: Decimal,
}

/// An account whose stored balance disagrees with its transaction log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceMismatch {
    pub account: AccountId,
    pub stored: Decimal,
    pub derived: Decimal,
}

/// DuckDB-backed ledger store
pub struct DuckDbStore {
    root: Mutex<Connection>,
    idle: Mutex<Vec<Connection>>,
    db_path: Option<PathBuf>,
    retry: RetryPolicy,
}

impl DuckDbStore {
    /// Open (or create) the ledger database
    ///
    /// Retries with exponential backoff while the file is locked by another
    /// process.
    pub fn open(db_path: &Path, retry: RetryPolicy) -> Result<Self> {
        let mut attempt = 0;
        loop {
            match Self::try_open_connection(db_path) {
                Ok(conn) => return Ok(Self::from_root(conn, Some(db_path.to_path_buf()), retry)),
                Err(e) => {
                    let err_msg = e.to_string();
                    attempt += 1;
                    if !is_locked_error(&err_msg) || attempt >= MAX_OPEN_RETRIES {
                        return Err(e);
                    }
                    let delay =
                        Duration::from_millis(INITIAL_OPEN_RETRY_DELAY_MS * 2u64.pow(attempt - 1));
                    tracing::warn!(
                        attempt,
                        max = MAX_OPEN_RETRIES,
                        delay_ms = delay.as_millis() as u64,
                        error = %err_msg,
                        "database busy, retrying open"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory(retry: RetryPolicy) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_root(conn, None, retry))
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Extension autoloading stays off; nothing here needs extensions
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        Ok(Connection::open_with_flags(db_path, config)?)
    }

    fn from_root(conn: Connection, db_path: Option<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            root: Mutex::new(conn),
            idle: Mutex::new(Vec::new()),
            db_path,
            retry,
        }
    }

    /// Run pending schema migrations
    pub fn ensure_schema(&self) -> Result<MigrationResult> {
        let conn = self.checkout()?;
        MigrationService::new(&conn).run_pending()
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn checkout(&self) -> Result<PooledConnection<'_>> {
        let reused = self
            .idle
            .lock()
            .map_err(|_| Error::database("connection pool lock poisoned"))?
            .pop();
        let conn = match reused {
            Some(conn) => conn,
            None => self
                .root
                .lock()
                .map_err(|_| Error::database("root connection lock poisoned"))?
                .try_clone()?,
        };
        Ok(PooledConnection {
            conn: Some(conn),
            store: self,
        })
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < MAX_IDLE_CONNECTIONS {
                idle.push(conn);
            }
        }
    }

    /// Run `op` inside one database transaction and commit it
    ///
    /// Any error from `op` rolls the transaction back. Write conflicts are
    /// retried from scratch up to the policy's attempt limit, then surface as
    /// `ConcurrencyConflict`. The scope is checked before every attempt and
    /// again right before commit.
    pub fn atomic<T, F>(&self, scope: &OperationScope, mut op: F) -> Result<T>
    where
        F: FnMut(&UnitOfWork<'_>) -> Result<T>,
    {
        let deadline = scope.deadline_from(Instant::now());
        let mut conn = self.checkout()?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            scope.check(deadline)?;

            match Self::attempt(&mut conn, scope, deadline, &mut op) {
                Err(Error::ConcurrencyConflict { .. }) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "write conflict, retrying unit of work"
                    );
                    thread::sleep(delay);
                }
                Err(Error::ConcurrencyConflict { .. }) => {
                    tracing::warn!(attempts = attempt, "write conflict retries exhausted");
                    return Err(Error::ConcurrencyConflict { attempts: attempt });
                }
                result => return result,
            }
        }
    }

    fn attempt<T, F>(
        conn: &mut Connection,
        scope: &OperationScope,
        deadline: Option<Instant>,
        op: &mut F,
    ) -> Result<T>
    where
        F: FnMut(&UnitOfWork<'_>) -> Result<T>,
    {
        let uow = UnitOfWork {
            tx: conn.transaction()?,
        };
        // Dropping `uow` on any early return rolls the transaction back
        let value = op(&uow)?;
        scope.check(deadline)?;

        scope.begin_commit()?;
        let committed = uow.tx.commit();
        scope.end_commit(committed.is_ok());
        committed?;
        Ok(value)
    }

    /// Run a read-only query on a pooled connection
    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.checkout()?;
        f(&conn)
    }

    // === Accounts ===

    pub fn get_account(&self, id: AccountId) -> Result<Account> {
        self.read(|conn| query_account(conn, id)?.ok_or(Error::AccountNotFound(id)))
    }

    pub fn account_by_owner(&self, owner: UserId) -> Result<Option<Account>> {
        self.read(|conn| query_account_by_owner(conn, owner))
    }

    /// The is-owner capability; `AccountNotFound` if the account is missing
    pub fn is_owner(&self, user: UserId, account: AccountId) -> Result<bool> {
        Ok(self.get_account(account)?.is_owned_by(user))
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM accounts ORDER BY account_id",
                ACCOUNT_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], AccountRow::read)?
                .collect::<duckdb::Result<Vec<_>>>()?;
            rows.into_iter().map(AccountRow::into_account).collect()
        })
    }

    // === Transaction log ===

    pub fn get_transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.read(|conn| query_transaction(conn, id)?.ok_or(Error::TransactionNotFound(id)))
    }

    /// Transactions touching `account`, newest first
    pub fn history(&self, account: AccountId) -> Result<Vec<Transaction>> {
        self.read(|conn| {
            if query_account(conn, account)?.is_none() {
                return Err(Error::AccountNotFound(account));
            }
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM transactions
                 WHERE source_account = ? OR destination_account = ?
                 ORDER BY occurred_at DESC, transaction_id DESC",
                TRANSACTION_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![account.get(), account.get()], TransactionRow::read)?
                .collect::<duckdb::Result<Vec<_>>>()?;
            rows.into_iter().map(TransactionRow::into_transaction).collect()
        })
    }

    // === Loans ===

    pub fn get_loan(&self, id: LoanId) -> Result<Loan> {
        self.read(|conn| query_loan(conn, id)?.ok_or(Error::LoanNotFound(id)))
    }

    pub fn user_loans(&self, user: UserId) -> Result<Vec<Loan>> {
        self.read(|conn| {
            query_loans(
                conn,
                "WHERE user_id = ? ORDER BY loan_id",
                Some(user.get()),
            )
        })
    }

    pub fn all_loans(&self) -> Result<Vec<Loan>> {
        self.read(|conn| query_loans(conn, "ORDER BY loan_id", None))
    }

    pub fn loan_payments(&self, loan: LoanId) -> Result<Vec<LoanPayment>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT payment_id, loan_id, amount_minor, paid_at
                 FROM loan_payments WHERE loan_id = ? ORDER BY paid_at, payment_id",
            )?;
            let rows = stmt
                .query_map([loan.get()], PaymentRow::read)?
                .collect::<duckdb::Result<Vec<_>>>()?;
            rows.into_iter().map(PaymentRow::into_payment).collect()
        })
    }

    pub fn loan_payments_total(&self, loan: LoanId) -> Result<Decimal> {
        self.read(|conn| query_payments_total(conn, loan))
    }

    // === Diagnostics ===

    pub fn stats(&self) -> Result<StoreStats> {
        self.read(|conn| {
            let (accounts, total_minor): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), CAST(COALESCE(SUM(balance_minor), 0) AS BIGINT) FROM accounts",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let (transactions, reversals): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COUNT(*) FILTER (WHERE is_reversal) FROM transactions",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let (loans, active_loans): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COUNT(*) FILTER (WHERE NOT is_repaid) FROM loans",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(StoreStats {
                accounts,
                transactions,
                reversals,
                loans,
                active_loans,
                total_balance: from_minor_units(total_minor),
            })
        })
    }

    pub fn negative_balances(&self) -> Result<Vec<AccountId>> {
        self.read(|conn| {
            query_ids(
                conn,
                "SELECT account_id FROM accounts WHERE balance_minor < 0 ORDER BY account_id",
            )
            .map(|ids| ids.into_iter().map(AccountId).collect())
        })
    }

    /// Accounts whose balance is not the sum of their logged movements
    pub fn balance_mismatches(&self) -> Result<Vec<BalanceMismatch>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT a.account_id, a.balance_minor,
                        CAST(COALESCE((SELECT SUM(t.amount_minor) FROM transactions t
                                       WHERE t.destination_account = a.account_id), 0)
                           - COALESCE((SELECT SUM(t.amount_minor) FROM transactions t
                                       WHERE t.source_account = a.account_id), 0) AS BIGINT)
                 FROM accounts a
                 ORDER BY a.account_id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })?
                .collect::<duckdb::Result<Vec<_>>>()?;
            Ok(rows
                .into_iter()
                .filter(|(_, stored, derived)| stored != derived)
                .map(|(id, stored, derived)| BalanceMismatch {
                    account: AccountId(id),
                    stored: from_minor_units(stored),
                    derived: from_minor_units(derived),
                })
                .collect())
        })
    }

    /// Loans whose account no longer exists
    pub fn orphaned_loans(&self) -> Result<Vec<LoanId>> {
        self.read(|conn| {
            query_ids(
                conn,
                "SELECT l.loan_id FROM loans l
                 LEFT JOIN accounts a ON a.account_id = l.account_id
                 WHERE a.account_id IS NULL
                 ORDER BY l.loan_id",
            )
            .map(|ids| ids.into_iter().map(LoanId).collect())
        })
    }

    /// Log rows that point at a missing account or a missing reversed original
    pub fn orphaned_transactions(&self) -> Result<Vec<TransactionId>> {
        self.read(|conn| {
            query_ids(
                conn,
                "SELECT t.transaction_id FROM transactions t
                 WHERE (t.source_account IS NOT NULL
                        AND t.source_account NOT IN (SELECT account_id FROM accounts))
                    OR (t.destination_account IS NOT NULL
                        AND t.destination_account NOT IN (SELECT account_id FROM accounts))
                    OR (t.reversal_of IS NOT NULL
                        AND t.reversal_of NOT IN (SELECT transaction_id FROM transactions))
                 ORDER BY t.transaction_id",
            )
            .map(|ids| ids.into_iter().map(TransactionId).collect())
        })
    }

    /// Rows whose kind or amount cannot be read back
    pub fn malformed_transactions(&self) -> Result<Vec<TransactionId>> {
        let known: Vec<String> = TransactionKind::ALL
            .iter()
            .map(|kind| format!("'{}'", kind.as_str()))
            .collect();
        let sql = format!(
            "SELECT transaction_id FROM transactions
             WHERE kind NOT IN ({}) OR amount_minor <= 0
                OR (is_reversal <> (kind = 'reversal'))
             ORDER BY transaction_id",
            known.join(", ")
        );
        self.read(|conn| {
            query_ids(conn, &sql).map(|ids| ids.into_iter().map(TransactionId).collect())
        })
    }
}

/// A connection checked out of the store's idle pool
struct PooledConnection<'a> {
    conn: Option<Connection>,
    store: &'a DuckDbStore,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.store.release(conn);
        }
    }
}

/// One atomic database transaction
///
/// Nothing is visible to other connections until the store commits it.
/// Dropping it without commit rolls everything back.
pub struct UnitOfWork<'conn> {
    tx: DbTransaction<'conn>,
}

impl UnitOfWork<'_> {
    pub fn account(&self, id: AccountId) -> Result<Account> {
        query_account(&self.tx, id)?.ok_or(Error::AccountNotFound(id))
    }

    /// Owner of the account, `None` if it does not exist
    pub fn account_owner(&self, id: AccountId) -> Result<Option<UserId>> {
        Ok(query_account(&self.tx, id)?.map(|account| account.owner))
    }

    /// Open a zero-balance account; a user holds at most one
    pub fn create_account(&self, owner: UserId) -> Result<Account> {
        if query_account_by_owner(&self.tx, owner)?.is_some() {
            return Err(Error::AccountAlreadyExists(owner));
        }
        let created_at = now();
        let id: i64 = self
            .tx
            .query_row(
                "INSERT INTO accounts (owner_id, balance_minor, created_at)
                 VALUES (?, 0, ?) RETURNING account_id",
                params![owner.get(), created_at.timestamp_micros()],
                |row| row.get(0),
            )
            .map_err(|e| {
                if is_unique_violation(&e.to_string()) {
                    Error::AccountAlreadyExists(owner)
                } else {
                    Error::from(e)
                }
            })?;

        Ok(Account {
            id: AccountId(id),
            owner,
            balance: Decimal::ZERO,
            created_at,
        })
    }

    /// The atomic dual-entry primitive
    ///
    /// Debits and credits are applied in ascending account id order. A debit
    /// that would take a balance below zero fails with `InsufficientFunds`,
    /// and the caller's transaction is then rolled back as a whole.
    pub fn apply_dual_update(
        &self,
        debit: Option<(AccountId, Decimal)>,
        credit: Option<(AccountId, Decimal)>,
    ) -> Result<()> {
        let mut steps: Vec<(AccountId, i64)> = Vec::with_capacity(2);
        if let Some((account, amount)) = debit {
            steps.push((account, -to_minor_units(ensure_positive(amount)?)?));
        }
        if let Some((account, amount)) = credit {
            steps.push((account, to_minor_units(ensure_positive(amount)?)?));
        }
        match (debit, credit) {
            (None, None) => {
                return Err(Error::invalid_amount("update needs a debit or a credit"));
            }
            (Some((from, _)), Some((to, _))) if from == to => {
                return Err(Error::SameAccount(from));
            }
            _ => {}
        }
        steps.sort_by_key(|(account, _)| *account);

        for (account, delta) in steps {
            let updated = self.tx.execute(
                "UPDATE accounts SET balance_minor = balance_minor + ?
                 WHERE account_id = ? AND balance_minor + ? >= 0",
                params![delta, account.get(), delta],
            )?;
            if updated == 0 {
                let existing = self.account(account)?;
                return Err(Error::InsufficientFunds {
                    account,
                    needed: from_minor_units(-delta),
                    available: existing.balance,
                });
            }
        }
        Ok(())
    }

    /// Append a row to the transaction log
    pub fn record(&self, new: &NewTransaction) -> Result<Transaction> {
        let amount_minor = to_minor_units(ensure_positive(new.amount)?)?;
        if new.source.is_none() && new.destination.is_none() {
            return Err(Error::database(
                "transaction needs a source or a destination account",
            ));
        }
        let timestamp = now();
        let id: i64 = self.tx.query_row(
            "INSERT INTO transactions (
                source_account, destination_account, amount_minor, kind,
                occurred_at, description, is_reversal, reversal_of
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING transaction_id",
            params![
                new.source.map(AccountId::get),
                new.destination.map(AccountId::get),
                amount_minor,
                new.kind.as_str(),
                timestamp.timestamp_micros(),
                &new.description,
                new.is_reversal(),
                new.reversal_of.map(TransactionId::get),
            ],
            |row| row.get(0),
        )?;

        Ok(Transaction {
            id: TransactionId(id),
            source: new.source,
            destination: new.destination,
            amount: from_minor_units(amount_minor),
            kind: new.kind,
            timestamp,
            description: new.description.clone(),
            is_reversal: new.is_reversal(),
            reversal_of: new.reversal_of,
        })
    }

    pub fn transaction(&self, id: TransactionId) -> Result<Transaction> {
        query_transaction(&self.tx, id)?.ok_or(Error::TransactionNotFound(id))
    }

    /// First reversal recorded against `original`, if any
    pub fn find_reversal_of(&self, original: TransactionId) -> Result<Option<TransactionId>> {
        let id: Option<i64> = optional(self.tx.query_row(
            "SELECT transaction_id FROM transactions
             WHERE reversal_of = ? ORDER BY transaction_id LIMIT 1",
            [original.get()],
            |row| row.get(0),
        ))?;
        Ok(id.map(TransactionId))
    }

    pub fn insert_loan(
        &self,
        user: UserId,
        account: AccountId,
        principal: Decimal,
        annual_rate: Decimal,
    ) -> Result<Loan> {
        let principal_minor = to_minor_units(ensure_positive(principal)?)?;
        let start = now();
        let id: i64 = self.tx.query_row(
            "INSERT INTO loans (
                user_id, account_id, principal_minor, annual_rate, start_date,
                next_payment_due, is_repaid, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, NULL, FALSE, ?, ?) RETURNING loan_id",
            params![
                user.get(),
                account.get(),
                principal_minor,
                annual_rate.to_string(),
                start.timestamp_micros(),
                start.timestamp_micros(),
                start.timestamp_micros(),
            ],
            |row| row.get(0),
        )?;

        Ok(Loan {
            id: LoanId(id),
            user,
            account,
            principal: from_minor_units(principal_minor),
            annual_rate,
            start_date: start,
            next_payment_due: None,
            state: LoanState::Active,
            repaid_at: None,
            created_at: start,
            updated_at: start,
        })
    }

    pub fn loan(&self, id: LoanId) -> Result<Loan> {
        query_loan(&self.tx, id)?.ok_or(Error::LoanNotFound(id))
    }

    pub fn loan_payments_total(&self, loan: LoanId) -> Result<Decimal> {
        query_payments_total(&self.tx, loan)
    }

    pub fn insert_loan_payment(&self, loan: LoanId, amount: Decimal) -> Result<LoanPayment> {
        let amount_minor = to_minor_units(ensure_positive(amount)?)?;
        let paid_at = now();
        let id: i64 = self.tx.query_row(
            "INSERT INTO loan_payments (loan_id, amount_minor, paid_at)
             VALUES (?, ?, ?) RETURNING payment_id",
            params![loan.get(), amount_minor, paid_at.timestamp_micros()],
            |row| row.get(0),
        )?;
        Ok(LoanPayment {
            id: LoanPaymentId(id),
            loan,
            amount: from_minor_units(amount_minor),
            paid_at,
        })
    }

    /// Write to an active loan's row so concurrent writers to the same loan conflict
    ///
    /// Returns `false` when the loan is already repaid.
    pub fn claim_active_loan(&self, loan: LoanId) -> Result<bool> {
        let updated = self.tx.execute(
            "UPDATE loans SET updated_at = ? WHERE loan_id = ? AND NOT is_repaid",
            params![now().timestamp_micros(), loan.get()],
        )?;
        Ok(updated == 1)
    }

    pub fn set_next_payment_due(&self, loan: LoanId, due: DateTime<Utc>) -> Result<()> {
        self.tx.execute(
            "UPDATE loans SET next_payment_due = ?, updated_at = ? WHERE loan_id = ?",
            params![due.timestamp_micros(), now().timestamp_micros(), loan.get()],
        )?;
        Ok(())
    }

    /// Move a loan to `Repaid` as of `settled_at`; returns `false` if it already was
    pub fn mark_loan_repaid(&self, loan: LoanId, settled_at: DateTime<Utc>) -> Result<bool> {
        let updated = self.tx.execute(
            "UPDATE loans SET is_repaid = TRUE, repaid_at = ?, updated_at = ?
             WHERE loan_id = ? AND NOT is_repaid",
            params![
                settled_at.timestamp_micros(),
                now().timestamp_micros(),
                loan.get()
            ],
        )?;
        if updated == 0 {
            // Distinguish a missing loan from one that is already repaid
            self.loan(loan)?;
        }
        Ok(updated == 1)
    }
}

/// Current time at the precision the database stores
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| Error::database(format!("timestamp out of range: {}", micros)))
}

/// Turn "no rows" into `None`
fn optional<T>(result: duckdb::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// === Row mapping ===

const ACCOUNT_COLUMNS: &str = "account_id, owner_id, balance_minor, created_at";

const TRANSACTION_COLUMNS: &str = "transaction_id, source_account, destination_account, \
     amount_minor, kind, occurred_at, description, is_reversal, reversal_of";

const LOAN_COLUMNS: &str = "loan_id, user_id, account_id, principal_minor, annual_rate, \
     start_date, next_payment_due, is_repaid, repaid_at, created_at, updated_at";

struct AccountRow {
    id: i64,
    owner: i64,
    balance_minor: i64,
    created_at: i64,
}

impl AccountRow {
    fn read(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            balance_minor: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    fn into_account(self) -> Result<Account> {
        Ok(Account {
            id: AccountId(self.id),
            owner: UserId(self.owner),
            balance: from_minor_units(self.balance_minor),
            created_at: from_micros(self.created_at)?,
        })
    }
}

struct TransactionRow {
    id: i64,
    source: Option<i64>,
    destination: Option<i64>,
    amount_minor: i64,
    kind: String,
    occurred_at: i64,
    description: String,
    is_reversal: bool,
    reversal_of: Option<i64>,
}

impl TransactionRow {
    fn read(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source: row.get(1)?,
            destination: row.get(2)?,
            amount_minor: row.get(3)?,
            kind: row.get(4)?,
            occurred_at: row.get(5)?,
            description: row.get(6)?,
            is_reversal: row.get(7)?,
            reversal_of: row.get(8)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        Ok(Transaction {
            id: TransactionId(self.id),
            source: self.source.map(AccountId),
            destination: self.destination.map(AccountId),
            amount: from_minor_units(self.amount_minor),
            kind: TransactionKind::from_str(&self.kind)?,
            timestamp: from_micros(self.occurred_at)?,
            description: self.description,
            is_reversal: self.is_reversal,
            reversal_of: self.reversal_of.map(TransactionId),
        })
    }
}

struct LoanRow {
    id: i64,
    user: i64,
    account: i64,
    principal_minor: i64,
    annual_rate: String,
    start_date: i64,
    next_payment_due: Option<i64>,
    is_repaid: bool,
    repaid_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl LoanRow {
    fn read(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user: row.get(1)?,
            account: row.get(2)?,
            principal_minor: row.get(3)?,
            annual_rate: row.get(4)?,
            start_date: row.get(5)?,
            next_payment_due: row.get(6)?,
            is_repaid: row.get(7)?,
            repaid_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_loan(self) -> Result<Loan> {
        let annual_rate = Decimal::from_str(&self.annual_rate).map_err(|e| {
            Error::database(format!(
                "loan {} has unreadable rate '{}': {}",
                self.id, self.annual_rate, e
            ))
        })?;
        Ok(Loan {
            id: LoanId(self.id),
            user: UserId(self.user),
            account: AccountId(self.account),
            principal: from_minor_units(self.principal_minor),
            annual_rate,
            start_date: from_micros(self.start_date)?,
            next_payment_due: self.next_payment_due.map(from_micros).transpose()?,
            state: LoanState::from_repaid_flag(self.is_repaid),
            repaid_at: self.repaid_at.map(from_micros).transpose()?,
            created_at: from_micros(self.created_at)?,
            updated_at: from_micros(self.updated_at)?,
        })
    }
}

struct PaymentRow {
    id: i64,
    loan: i64,
    amount_minor: i64,
    paid_at: i64,
}

impl PaymentRow {
    fn read(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            loan: row.get(1)?,
            amount_minor: row.get(2)?,
            paid_at: row.get(3)?,
        })
    }

    fn into_payment(self) -> Result<LoanPayment> {
        Ok(LoanPayment {
            id: LoanPaymentId(self.id),
            loan: LoanId(self.loan),
            amount: from_minor_units(self.amount_minor),
            paid_at: from_micros(self.paid_at)?,
        })
    }
}

// === Shared queries (usable on a pooled connection or inside a unit of work) ===

fn query_account(conn: &Connection, id: AccountId) -> Result<Option<Account>> {
    optional(conn.query_row(
        &format!("SELECT {} FROM accounts WHERE account_id = ?", ACCOUNT_COLUMNS),
        [id.get()],
        AccountRow::read,
    ))?
    .map(AccountRow::into_account)
    .transpose()
}

fn query_account_by_owner(conn: &Connection, owner: UserId) -> Result<Option<Account>> {
    optional(conn.query_row(
        &format!("SELECT {} FROM accounts WHERE owner_id = ?", ACCOUNT_COLUMNS),
        [owner.get()],
        AccountRow::read,
    ))?
    .map(AccountRow::into_account)
    .transpose()
}

fn query_transaction(conn: &Connection, id: TransactionId) -> Result<Option<Transaction>> {
    optional(conn.query_row(
        &format!(
            "SELECT {} FROM transactions WHERE transaction_id = ?",
            TRANSACTION_COLUMNS
        ),
        [id.get()],
        TransactionRow::read,
    ))?
    .map(TransactionRow::into_transaction)
    .transpose()
}

fn query_loan(conn: &Connection, id: LoanId) -> Result<Option<Loan>> {
    optional(conn.query_row(
        &format!("SELECT {} FROM loans WHERE loan_id = ?", LOAN_COLUMNS),
        [id.get()],
        LoanRow::read,
    ))?
    .map(LoanRow::into_loan)
    .transpose()
}

fn query_loans(conn: &Connection, filter: &str, param: Option<i64>) -> Result<Vec<Loan>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM loans {}", LOAN_COLUMNS, filter))?;
    let rows = match param {
        Some(value) => stmt.query_map([value], LoanRow::read)?.collect::<duckdb::Result<Vec<_>>>()?,
        None => stmt.query_map([], LoanRow::read)?.collect::<duckdb::Result<Vec<_>>>()?,
    };
    rows.into_iter().map(LoanRow::into_loan).collect()
}

fn query_payments_total(conn: &Connection, loan: LoanId) -> Result<Decimal> {
    let total: i64 = conn.query_row(
        "SELECT CAST(COALESCE(SUM(amount_minor), 0) AS BIGINT)
         FROM loan_payments WHERE loan_id = ?",
        [loan.get()],
        |row| row.get(0),
    )?;
    Ok(from_minor_units(total))
}

fn query_ids(conn: &Connection, sql: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<duckdb::Result<Vec<_>>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DuckDbStore {
        let store = DuckDbStore::open_in_memory(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        })
        .unwrap();
        store.ensure_schema().unwrap();
        store
    }

    fn funded(store: &DuckDbStore, owner: i64, cents: i64) -> AccountId {
        store
            .atomic(&OperationScope::unbounded(), |uow| {
                let account = uow.create_account(UserId(owner))?;
                if cents > 0 {
                    uow.apply_dual_update(None, Some((account.id, Decimal::new(cents, 2))))?;
                }
                Ok(account.id)
            })
            .unwrap()
    }

    #[test]
    fn test_conflict_messages_map_to_retryable_error() {
        assert!(is_conflict_error(
            "TransactionContext Error: Conflict on update!"
        ));
        assert!(is_conflict_error("Catalog write-write conflict on alter"));
        assert!(!is_conflict_error("Constraint Error: CHECK constraint failed"));
        assert!(is_unique_violation(
            "Constraint Error: Duplicate key \"owner_id: 1\" violates unique constraint"
        ));
    }

    #[test]
    fn test_locked_error_detection() {
        assert!(is_locked_error("IO Error: Could not set lock on file: database is locked"));
        assert!(!is_locked_error("Catalog Error: Table does not exist"));
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
        };
        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(20));
        let third = policy.backoff(3);
        assert!(third >= Duration::from_millis(40) && third <= Duration::from_millis(50));
        let capped = policy.backoff(40);
        assert!(capped <= Duration::from_millis(10 * 64 + 10));
    }

    #[test]
    fn test_dual_update_moves_money() {
        let store = store();
        let a = funded(&store, 1, 10_000);
        let b = funded(&store, 2, 0);

        store
            .atomic(&OperationScope::unbounded(), |uow| {
                uow.apply_dual_update(Some((a, Decimal::new(2550, 2))), Some((b, Decimal::new(2550, 2))))
            })
            .unwrap();

        assert_eq!(store.get_account(a).unwrap().balance, Decimal::new(7450, 2));
        assert_eq!(store.get_account(b).unwrap().balance, Decimal::new(2550, 2));
    }

    #[test]
    fn test_failed_debit_rolls_back_earlier_credit() {
        let store = store();
        // Credit lands on the lower id first, then the debit on the higher id fails
        let low = funded(&store, 1, 0);
        let high = funded(&store, 2, 500);

        let err = store
            .atomic(&OperationScope::unbounded(), |uow| {
                uow.apply_dual_update(Some((high, Decimal::from(10))), Some((low, Decimal::from(10))))
            })
            .unwrap_err();

        match err {
            Error::InsufficientFunds { account, needed, available } => {
                assert_eq!(account, high);
                assert_eq!(needed, Decimal::from(10));
                assert_eq!(available, Decimal::new(500, 2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.get_account(low).unwrap().balance, Decimal::ZERO);
        assert_eq!(store.get_account(high).unwrap().balance, Decimal::new(500, 2));
    }

    #[test]
    fn test_dual_update_validation() {
        let store = store();
        let a = funded(&store, 1, 100);
        let scope = OperationScope::unbounded();

        let same = store.atomic(&scope, |uow| {
            uow.apply_dual_update(Some((a, Decimal::ONE)), Some((a, Decimal::ONE)))
        });
        assert!(matches!(same, Err(Error::SameAccount(_))));

        let zero = store.atomic(&scope, |uow| uow.apply_dual_update(None, Some((a, Decimal::ZERO))));
        assert!(matches!(zero, Err(Error::InvalidAmount(_))));

        let missing = store.atomic(&scope, |uow| {
            uow.apply_dual_update(None, Some((AccountId(999), Decimal::ONE)))
        });
        assert!(matches!(missing, Err(Error::AccountNotFound(AccountId(999)))));
    }

    #[test]
    fn test_error_inside_unit_of_work_rolls_back_everything() {
        let store = store();
        let a = funded(&store, 1, 0);

        let result: Result<()> = store.atomic(&OperationScope::unbounded(), |uow| {
            uow.apply_dual_update(None, Some((a, Decimal::from(50))))?;
            uow.record(&NewTransaction::deposit(a, Decimal::from(50), "gift"))?;
            Err(Error::database("simulated failure"))
        });

        assert!(result.is_err());
        assert_eq!(store.get_account(a).unwrap().balance, Decimal::ZERO);
        assert!(store.history(a).unwrap().is_empty());
    }

    #[test]
    fn test_one_account_per_owner() {
        let store = store();
        funded(&store, 7, 0);
        let again = store.atomic(&OperationScope::unbounded(), |uow| uow.create_account(UserId(7)));
        assert!(matches!(again, Err(Error::AccountAlreadyExists(UserId(7)))));
    }

    #[test]
    fn test_record_and_read_back() {
        let store = store();
        let a = funded(&store, 1, 0);
        let recorded = store
            .atomic(&OperationScope::unbounded(), |uow| {
                uow.record(&NewTransaction::deposit(a, Decimal::new(1999, 2), "salary"))
            })
            .unwrap();

        let loaded = store.get_transaction(recorded.id).unwrap();
        assert_eq!(loaded, recorded);
        assert!(matches!(
            store.get_transaction(TransactionId(12345)),
            Err(Error::TransactionNotFound(_))
        ));
    }

    #[test]
    fn test_history_ties_break_by_id_descending() {
        let store = store();
        let a = funded(&store, 1, 0);
        let mut ids = store
            .atomic(&OperationScope::unbounded(), |uow| {
                let mut ids = Vec::new();
                for cents in 1..=4 {
                    let tx = uow.record(&NewTransaction::deposit(a, Decimal::new(cents, 2), ""))?;
                    ids.push(tx.id);
                }
                ids.push(uow.record(&NewTransaction::withdraw(a, Decimal::ONE, ""))?.id);
                uow.tx.execute("UPDATE transactions SET occurred_at = 42", params![])?;
                Ok(ids)
            })
            .unwrap();

        let history = store.history(a).unwrap();
        assert!(history.iter().all(|tx| tx.timestamp.timestamp_micros() == 42));
        ids.reverse();
        assert_eq!(history.iter().map(|tx| tx.id).collect::<Vec<_>>(), ids);
        // Same answer on every read
        assert_eq!(store.history(a).unwrap(), history);
    }

    #[test]
    fn test_overlapping_writers_conflict() {
        let store = store();
        let a = funded(&store, 1, 1000);

        let mut first = store.checkout().unwrap();
        let mut second = store.checkout().unwrap();
        let tx1 = first.transaction().unwrap();
        let tx2 = second.transaction().unwrap();

        tx1.execute(
            "UPDATE accounts SET balance_minor = balance_minor - 1 WHERE account_id = ?",
            [a.get()],
        )
        .unwrap();
        let clash = tx2
            .execute(
                "UPDATE accounts SET balance_minor = balance_minor - 1 WHERE account_id = ?",
                [a.get()],
            )
            .and_then(|_| tx2.commit());

        let err = Error::from(clash.unwrap_err());
        assert!(err.is_retryable(), "expected a conflict, got {err:?}");
        tx1.commit().unwrap();
    }

    #[test]
    fn test_pool_reuses_connections() {
        let store = store();
        {
            let _a = store.checkout().unwrap();
            let _b = store.checkout().unwrap();
        }
        assert_eq!(store.idle.lock().unwrap().len(), 2);
        let _c = store.checkout().unwrap();
        assert_eq!(store.idle.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_loan_rows_round_trip() {
        let store = store();
        let a = funded(&store, 1, 0);
        let loan = store
            .atomic(&OperationScope::unbounded(), |uow| {
                let loan = uow.insert_loan(UserId(1), a, Decimal::from(1000), Decimal::new(165, 1))?;
                uow.insert_loan_payment(loan.id, Decimal::from(100))?;
                Ok(loan)
            })
            .unwrap();

        assert_eq!(store.get_loan(loan.id).unwrap(), loan);
        assert_eq!(store.loan_payments_total(loan.id).unwrap(), Decimal::from(100));
        assert_eq!(store.user_loans(UserId(1)).unwrap().len(), 1);

        let changed = store
            .atomic(&OperationScope::unbounded(), |uow| {
                uow.mark_loan_repaid(loan.id, loan.start_date)
            })
            .unwrap();
        assert!(changed);
        let again = store
            .atomic(&OperationScope::unbounded(), |uow| uow.mark_loan_repaid(loan.id, now()))
            .unwrap();
        assert!(!again);
        let settled = store.get_loan(loan.id).unwrap();
        assert!(settled.is_repaid());
        // The first settlement wins
        assert_eq!(settled.repaid_at, Some(loan.start_date));
    }
}
