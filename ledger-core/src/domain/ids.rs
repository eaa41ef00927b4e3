//! Strongly typed identifiers
//!
//! Every identifier is a storage-assigned `i64`. Wrapping them keeps an
//! account id from being passed where a loan id is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }
    };
}

id_type!(
    /// Ledger account identifier
    AccountId
);
id_type!(
    /// Customer identifier (owner of accounts and loans)
    UserId
);
id_type!(
    /// Transaction log row identifier, monotonically increasing
    TransactionId
);
id_type!(
    /// Loan identifier
    LoanId
);
id_type!(LoanPaymentId);
