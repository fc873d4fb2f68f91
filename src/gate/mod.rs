//! Rate gate for interactive user actions.
//!
//! A fixed-window limiter over a shared key-value store with expiring keys.

mod rate_gate;
mod store;

pub use rate_gate::{MESSAGE_ACTION, RateGate, RateKey};
pub use store::{KeyValueStore, MemoryStore, StoreError};
