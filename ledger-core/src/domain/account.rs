//! Account domain model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ids::{AccountId, UserId};

/// A customer account held in the ledger
///
/// The balance is never negative once an operation has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner: UserId,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Whether the given user owns this account
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner == user
    }

    /// Whether the balance covers a debit of `amount`
    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}
