//! Interest rate provider port
//!
//! Loans fix their annual rate at issue time from whatever the bank
//! currently quotes. Implementations may hit the network.

use rust_decimal::Decimal;

use crate::domain::result::Result;

/// Source of the current annual interest rate, in percent
pub trait RateProvider: Send + Sync {
    /// Provider name (e.g., "fixed", "cbr")
    fn name(&self) -> &str;

    /// Current annual rate in percent, e.g. `16.5` for 16.5%
    ///
    /// Failures surface as `Error::RateUnavailable`.
    fn current_rate(&self) -> Result<Decimal>;
}
