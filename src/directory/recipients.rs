//! Recipient selection for broadcasts.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Which users a broadcast goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientMode {
    /// Every user that is not banned.
    All,

    /// Users seen within the active window that are not banned.
    RecentlyActive,
}

impl RecipientMode {
    /// Returns the short name used in commands and history.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::RecentlyActive => "active",
        }
    }
}

impl fmt::Display for RecipientMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RecipientMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "active" | "recent" | "recently_active" => Ok(Self::RecentlyActive),
            other => Err(format!("unknown recipient mode: '{other}' (use 'all' or 'active')")),
        }
    }
}

/// Source of broadcast recipients.
///
/// The returned list is computed once per call and is finite; its order is
/// the order deliveries are attempted in.
pub trait RecipientSource: Send + Sync {
    /// Error raised when the recipient list cannot be produced.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists the recipients selected by `mode`.
    fn list_recipients(
        &self,
        mode: RecipientMode,
    ) -> impl Future<Output = Result<Vec<Identity>, Self::Error>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str() {
        assert_eq!("all".parse::<RecipientMode>(), Ok(RecipientMode::All));
        assert_eq!(" Active ".parse::<RecipientMode>(), Ok(RecipientMode::RecentlyActive));
        assert!("everyone".parse::<RecipientMode>().is_err());
    }

    #[test]
    fn test_mode_display_round_trips_through_name() {
        for mode in [RecipientMode::All, RecipientMode::RecentlyActive] {
            assert_eq!(mode.to_string().parse::<RecipientMode>(), Ok(mode));
        }
    }
}
