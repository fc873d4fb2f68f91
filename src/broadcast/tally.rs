//! Delivery outcomes and their running tally.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The message reached the recipient.
    Delivered,

    /// The recipient blocked the bot or deactivated their account.
    RecipientUnreachable,

    /// Anything else; a later run might succeed.
    TransientFailure,
}

impl DeliveryOutcome {
    /// Classifies a delivery attempt.
    #[must_use]
    pub fn of(result: &Result<(), DeliveryError>) -> Self {
        match result {
            Ok(()) => Self::Delivered,
            Err(e) => e.outcome(),
        }
    }

    /// Classifies raw error text: mentions of "blocked" or "deactivated"
    /// (any case) mean the recipient is unreachable.
    #[must_use]
    pub fn from_error_text(text: &str) -> Self {
        let text = text.to_lowercase();
        if text.contains("blocked") || text.contains("deactivated") {
            Self::RecipientUnreachable
        } else {
            Self::TransientFailure
        }
    }
}

/// Failure reported by a transport for one recipient.
///
/// Transports that know their error taxonomy return `Unreachable` or
/// `Transient`; `Unclassified` carries raw error text that is classified
/// with [`DeliveryOutcome::from_error_text`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("recipient unreachable: {0}")]
    Unreachable(String),

    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Unclassified(String),
}

impl DeliveryError {
    /// Returns the outcome this error is recorded as.
    #[must_use]
    pub fn outcome(&self) -> DeliveryOutcome {
        match self {
            Self::Unreachable(_) => DeliveryOutcome::RecipientUnreachable,
            Self::Transient(_) => DeliveryOutcome::TransientFailure,
            Self::Unclassified(text) => DeliveryOutcome::from_error_text(text),
        }
    }
}

/// Counts of a broadcast run.
///
/// `delivered + transient_failures + unreachable == processed <= total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastTally {
    pub total: usize,
    pub processed: usize,
    pub delivered: usize,
    pub transient_failures: usize,
    pub unreachable: usize,
}

impl BroadcastTally {
    /// Returns whether every recipient has been attempted.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.processed == self.total
    }
}

impl fmt::Display for BroadcastTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} processed: {} delivered, {} failed, {} blocked",
            self.processed, self.total, self.delivered, self.transient_failures, self.unreachable
        )
    }
}

/// Accumulates outcomes of one broadcast.
///
/// Owned by the dispatch loop; everything else only sees copies.
#[derive(Debug)]
pub struct OutcomeAggregator {
    tally: BroadcastTally,
}

impl OutcomeAggregator {
    /// Starts a tally for `total` recipients.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            tally: BroadcastTally {
                total,
                ..BroadcastTally::default()
            },
        }
    }

    /// Records one attempt.
    pub fn record(&mut self, outcome: DeliveryOutcome) {
        self.tally.processed += 1;
        match outcome {
            DeliveryOutcome::Delivered => self.tally.delivered += 1,
            DeliveryOutcome::RecipientUnreachable => self.tally.unreachable += 1,
            DeliveryOutcome::TransientFailure => self.tally.transient_failures += 1,
        }
    }

    /// Returns a copy of the current counts.
    #[must_use]
    pub const fn snapshot(&self) -> BroadcastTally {
        self.tally
    }

    /// Ends the run and returns the final counts.
    #[must_use]
    pub const fn finalize(self) -> BroadcastTally {
        self.tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_classification() {
        assert_eq!(
            DeliveryOutcome::from_error_text("Forbidden: bot was blocked by the user"),
            DeliveryOutcome::RecipientUnreachable
        );
        assert_eq!(
            DeliveryOutcome::from_error_text("Forbidden: user is DEACTIVATED"),
            DeliveryOutcome::RecipientUnreachable
        );
        assert_eq!(
            DeliveryOutcome::from_error_text("USER_IS_BLOCKED"),
            DeliveryOutcome::RecipientUnreachable
        );
        assert_eq!(
            DeliveryOutcome::from_error_text("connection reset by peer"),
            DeliveryOutcome::TransientFailure
        );
        assert_eq!(
            DeliveryOutcome::from_error_text(""),
            DeliveryOutcome::TransientFailure
        );
    }

    #[test]
    fn test_structured_errors_skip_text_heuristic() {
        let typed = DeliveryError::Transient("chat blocked by flood control".to_owned());
        assert_eq!(typed.outcome(), DeliveryOutcome::TransientFailure);

        let typed = DeliveryError::Unreachable("PEER_ID_INVALID".to_owned());
        assert_eq!(typed.outcome(), DeliveryOutcome::RecipientUnreachable);

        assert_eq!(DeliveryOutcome::of(&Ok(())), DeliveryOutcome::Delivered);
    }

    #[test]
    fn test_aggregator_counts() {
        let mut aggregator = OutcomeAggregator::new(4);
        aggregator.record(DeliveryOutcome::Delivered);
        aggregator.record(DeliveryOutcome::Delivered);
        aggregator.record(DeliveryOutcome::RecipientUnreachable);

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.processed, 3);
        assert!(!snapshot.is_complete());

        aggregator.record(DeliveryOutcome::TransientFailure);
        let tally = aggregator.finalize();
        assert_eq!(
            tally,
            BroadcastTally {
                total: 4,
                processed: 4,
                delivered: 2,
                transient_failures: 1,
                unreachable: 1,
            }
        );
        assert!(tally.is_complete());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut aggregator = OutcomeAggregator::new(2);
        let before = aggregator.snapshot();
        aggregator.record(DeliveryOutcome::Delivered);
        assert_eq!(before.processed, 0);
        assert_eq!(aggregator.snapshot().processed, 1);
    }

    #[test]
    fn test_tally_display() {
        let tally = BroadcastTally {
            total: 10,
            processed: 5,
            delivered: 3,
            transient_failures: 1,
            unreachable: 1,
        };
        assert_eq!(
            tally.to_string(),
            "5/10 processed: 3 delivered, 1 failed, 1 blocked"
        );
    }
}
