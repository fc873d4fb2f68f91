//! Rate-paced broadcast of one message to many users.
//!
//! Recipients come from a [`RecipientSource`](crate::directory::RecipientSource),
//! deliveries go through a [`Transport`], and outcomes are tallied into a
//! [`BroadcastTally`]. A [`BroadcastJob`] ties these together with the
//! history log and the admin's status message.

mod dispatcher;
mod history;
mod job;
mod tally;

pub use dispatcher::{Dispatcher, LogProgress, PacingPolicy, ProgressError, ProgressSink, Transport};
pub use history::{BroadcastHistory, BroadcastRecord, BroadcastRequest, BroadcastStatus, HistoryError};
pub use job::BroadcastJob;
pub use tally::{BroadcastTally, DeliveryError, DeliveryOutcome, OutcomeAggregator};
