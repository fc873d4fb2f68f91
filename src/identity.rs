//! Recipient identity shared by the gate, the directory and broadcasts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable key of a Telegram user the bot talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub i64);

impl Identity {
    /// Returns the raw Telegram user id.
    #[must_use]
    pub const fn user_id(self) -> i64 {
        self.0
    }
}

impl From<i64> for Identity {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
