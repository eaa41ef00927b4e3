//! Caller identity passed explicitly to every mutating operation

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ids::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    /// A customer acting on their own accounts and loans
    User(UserId),
    /// Bank staff or an internal process; passes every ownership check
    Operator,
}

impl Principal {
    pub fn user(id: i64) -> Self {
        Self::User(UserId(id))
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User(id) => Some(*id),
            Self::Operator => None,
        }
    }

    pub fn is_operator(&self) -> bool {
        matches!(self, Self::Operator)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user {}", id),
            Self::Operator => f.write_str("operator"),
        }
    }
}
