//! Currency amounts
//!
//! Amounts are `Decimal` in the domain and whole minor units (cents) in
//! storage. Anything finer than a cent is rejected rather than rounded.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use super::result::{Error, Result};

/// Number of fractional digits in a currency amount
pub const CURRENCY_SCALE: u32 = 2;

/// Validate a caller-supplied amount: strictly positive, at most two decimals
pub fn ensure_positive(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(Error::invalid_amount(format!(
            "amount must be greater than zero, got {}",
            amount
        )));
    }
    if amount.normalize().scale() > CURRENCY_SCALE {
        return Err(Error::invalid_amount(format!(
            "amount {} has more than {} decimal places",
            amount, CURRENCY_SCALE
        )));
    }
    Ok(amount)
}

/// Convert a currency amount to minor units
pub fn to_minor_units(amount: Decimal) -> Result<i64> {
    let scaled = amount * Decimal::ONE_HUNDRED;
    if !scaled.fract().is_zero() {
        return Err(Error::invalid_amount(format!(
            "amount {} is not a whole number of cents",
            amount
        )));
    }
    scaled
        .to_i64()
        .ok_or_else(|| Error::invalid_amount(format!("amount {} is out of range", amount)))
}

/// Convert stored minor units back to a currency amount
pub fn from_minor_units(units: i64) -> Decimal {
    Decimal::new(units, CURRENCY_SCALE)
}

/// Round to cents, halves away from zero
pub fn round_currency(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}
