//! Loan domain model and interest accrual

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{AccountId, LoanId, LoanPaymentId, UserId};
use super::money::round_currency;

/// Day-count basis for the annual rate
pub const DAYS_PER_YEAR: i64 = 365;

/// Interval between scheduled repayments
pub const REPAYMENT_PERIOD_DAYS: i64 = 30;

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Loan lifecycle. `Repaid` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanState {
    Active,
    Repaid,
}

impl LoanState {
    pub fn from_repaid_flag(repaid: bool) -> Self {
        if repaid {
            Self::Repaid
        } else {
            Self::Active
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Repaid => "repaid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub user: UserId,
    /// Account that received the funds and pays them back
    pub account: AccountId,
    pub principal: Decimal,
    /// Annual simple-interest rate in percent, fixed at issue
    pub annual_rate: Decimal,
    pub start_date: DateTime<Utc>,
    pub next_payment_due: Option<DateTime<Utc>>,
    pub state: LoanState,
    /// Instant the debt was evaluated when the loan was settled
    pub repaid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    pub fn is_repaid(&self) -> bool {
        self.state == LoanState::Repaid
    }

    /// Due date of the next scheduled payment counted from `from`
    pub fn next_due_after(from: DateTime<Utc>) -> DateTime<Utc> {
        from + Duration::days(REPAYMENT_PERIOD_DAYS)
    }
}

/// A payment counted against a loan's debt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPayment {
    pub id: LoanPaymentId,
    pub loan: LoanId,
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
}

/// Fractional days elapsed between two instants, never negative
pub fn elapsed_days(from: DateTime<Utc>, to: DateTime<Utc>) -> Decimal {
    let micros = (to - from).num_microseconds().unwrap_or(i64::MAX);
    if micros <= 0 {
        return Decimal::ZERO;
    }
    Decimal::from(micros) / Decimal::from(MICROS_PER_DAY)
}

/// Simple-interest debt of a loan at `as_of`
///
/// `principal * (1 + rate / 365 / 100 * days) - total_paid`, floored at zero
/// and rounded to cents with halves away from zero.
pub fn outstanding_debt(loan: &Loan, total_paid: Decimal, as_of: DateTime<Utc>) -> Decimal {
    let days = elapsed_days(loan.start_date, as_of);
    let interest =
        loan.principal * loan.annual_rate * days / Decimal::from(DAYS_PER_YEAR * 100);
    let debt = loan.principal + interest - total_paid;
    if debt <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        round_currency(debt)
    }
}
