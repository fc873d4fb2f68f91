//! Sequential fan-out of one message to many recipients.
//!
//! The dispatcher walks the recipient list in order, one delivery at a time:
//! 1. Deliver through the transport and classify the result
//! 2. Record the outcome before the next recipient is attempted
//! 3. Every `batch_size` attempts, pause to stay under Telegram's send ceiling
//! 4. Every `progress_every` attempts, hand a snapshot to the progress sink
//!
//! Delivery failures are counted, never retried and never abort the run.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use super::tally::{BroadcastTally, DeliveryError, DeliveryOutcome, OutcomeAggregator};
use crate::identity::Identity;

/// Delivers one message to one recipient.
pub trait Transport: Send + Sync {
    /// What is being delivered (e.g. a reference to a stored message).
    type Payload: Sync;

    /// Sends `payload` to `recipient` once, without retrying.
    fn deliver(
        &self,
        payload: &Self::Payload,
        recipient: Identity,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// Failure to report progress. Always swallowed by the dispatcher.
#[derive(Debug, Error)]
#[error("Progress report failed: {0}")]
pub struct ProgressError(pub String);

/// Best-effort receiver of tally snapshots during a run.
pub trait ProgressSink: Send + Sync {
    /// Reports the current counts.
    fn on_progress(
        &self,
        snapshot: &BroadcastTally,
    ) -> impl Future<Output = Result<(), ProgressError>> + Send;
}

/// Progress sink writing snapshots to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    async fn on_progress(&self, snapshot: &BroadcastTally) -> Result<(), ProgressError> {
        info!("Broadcast progress: {}", snapshot);
        Ok(())
    }
}

/// Fixed send cadence for broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingPolicy {
    /// Attempts between two pauses. Zero disables pausing.
    pub batch_size: usize,

    /// Length of each pause.
    pub pause: Duration,

    /// Attempts between two progress reports. Zero disables reporting.
    pub progress_every: usize,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            batch_size: 25,
            pause: Duration::from_secs(1),
            progress_every: 100,
        }
    }
}

impl PacingPolicy {
    const fn pause_after(&self, attempts: usize) -> bool {
        self.batch_size > 0 && attempts % self.batch_size == 0
    }

    const fn report_after(&self, attempts: usize) -> bool {
        self.progress_every > 0 && attempts % self.progress_every == 0
    }
}

/// Broadcast dispatcher over a transport.
#[derive(Debug)]
pub struct Dispatcher<T> {
    transport: T,
    pacing: PacingPolicy,
}

impl<T: Transport> Dispatcher<T> {
    /// Creates a dispatcher with the default pacing policy.
    #[must_use]
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            pacing: PacingPolicy::default(),
        }
    }

    /// Sets the pacing policy.
    #[must_use]
    pub const fn with_pacing(mut self, pacing: PacingPolicy) -> Self {
        self.pacing = pacing;
        self
    }

    #[cfg(test)]
    pub(crate) const fn transport(&self) -> &T {
        &self.transport
    }

    /// Delivers `payload` to every recipient in order and returns the final tally.
    pub async fn dispatch<P: ProgressSink>(
        &self,
        recipients: &[Identity],
        payload: &T::Payload,
        progress: &P,
    ) -> BroadcastTally {
        let mut aggregator = OutcomeAggregator::new(recipients.len());
        info!("Broadcast started: {} recipients", recipients.len());

        for (i, &recipient) in recipients.iter().enumerate() {
            let result = self.transport.deliver(payload, recipient).await;
            let outcome = DeliveryOutcome::of(&result);
            if let Err(e) = &result {
                debug!("Delivery to {} failed ({:?}): {}", recipient, outcome, e);
            }
            aggregator.record(outcome);

            let attempts = i + 1;

            if self.pacing.pause_after(attempts) {
                tokio::time::sleep(self.pacing.pause).await;
            }

            if self.pacing.report_after(attempts) {
                // Best effort: a lost status message must not stop the run.
                if let Err(e) = progress.on_progress(&aggregator.snapshot()).await {
                    debug!("Ignoring progress failure: {}", e);
                }
            }
        }

        let tally = aggregator.finalize();
        info!("Broadcast completed: {}", tally);
        tally
    }
}
