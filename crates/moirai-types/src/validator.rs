use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-validator event sequence number (1-based, monotone per honest validator).
pub type Sequence = u64;

/// Logical creation time of an event.
pub type Timestamp = u64;

/// Stake weight of a validator.
pub type Weight = u64;

/// Opaque validator identifier (a short symbol such as `"A"`).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
pub struct ValidatorId(String);

impl ValidatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorId({})", self.0)
    }
}

impl From<&str> for ValidatorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ValidatorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
