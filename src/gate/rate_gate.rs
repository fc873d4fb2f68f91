//! Fixed-window admission gate for interactive user actions.
//!
//! Each admitted action installs a marker keyed by identity and action class
//! that lives for one window. While the marker exists, further actions of the
//! same class are rejected. Two actions straddling a window boundary can both
//! pass; that is the accepted cost of a fixed window.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::KeyValueStore;
use crate::identity::Identity;

/// Action class used for incoming chat messages.
pub const MESSAGE_ACTION: &str = "message";

/// Key of a throttling marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateKey {
    /// Acting user.
    pub identity: Identity,

    /// Kind of action being limited (e.g. `message`).
    pub action: &'static str,
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate:{}:{}", self.action, self.identity)
    }
}

/// Per-identity admission check for one action class.
#[derive(Debug)]
pub struct RateGate<S> {
    store: Arc<S>,
    action: &'static str,
}

impl<S> Clone for RateGate<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            action: self.action,
        }
    }
}

impl<S: KeyValueStore> RateGate<S> {
    /// Creates a gate for `action` backed by `store`.
    #[must_use]
    pub const fn new(store: Arc<S>, action: &'static str) -> Self {
        Self { store, action }
    }

    /// Returns `true` if `identity` may act now, installing a marker for `window`.
    ///
    /// Fails open: if the store cannot be reached the action is admitted.
    pub async fn admit(&self, identity: Identity, window: Duration) -> bool {
        let key = RateKey {
            identity,
            action: self.action,
        };

        match self.store.set_if_absent(&key.to_string(), window).await {
            Ok(true) => true,
            Ok(false) => {
                debug!("Throttled {}", key);
                false
            }
            Err(e) => {
                warn!("Rate gate store unavailable, admitting {}: {}", key, e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{MemoryStore, StoreError};

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        async fn set_if_absent(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
            Err(StoreError::Backend("connection refused".to_owned()))
        }
    }

    fn gate() -> RateGate<MemoryStore> {
        RateGate::new(Arc::new(MemoryStore::new()), MESSAGE_ACTION)
    }

    #[test]
    fn test_rate_key_display() {
        let key = RateKey {
            identity: Identity(42),
            action: "message",
        };
        assert_eq!(key.to_string(), "rate:message:42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_admits_exactly_one() {
        let gate = gate();
        let first = gate.admit(Identity(1), Duration::from_millis(500)).await;
        let second = gate.admit(Identity(1), Duration::from_millis(500)).await;
        assert!(first ^ second);
        assert!(first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admits_again_after_window() {
        let gate = gate();
        let window = Duration::from_millis(500);

        assert!(gate.admit(Identity(1), window).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!gate.admit(Identity(1), window).await);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(gate.admit(Identity(1), window).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identities_are_independent() {
        let gate = gate();
        let window = Duration::from_secs(1);
        assert!(gate.admit(Identity(1), window).await);
        assert!(gate.admit(Identity(2), window).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_classes_are_independent() {
        let store = Arc::new(MemoryStore::new());
        let messages = RateGate::new(Arc::clone(&store), "message");
        let searches = RateGate::new(store, "search");
        let window = Duration::from_secs(1);

        assert!(messages.admit(Identity(1), window).await);
        assert!(searches.admit(Identity(1), window).await);
        assert!(!messages.admit(Identity(1), window).await);
    }

    #[tokio::test]
    async fn test_fails_open_when_store_errors() {
        let gate = RateGate::new(Arc::new(BrokenStore), "message");
        for _ in 0..3 {
            assert!(gate.admit(Identity(1), Duration::from_secs(60)).await);
        }
    }

    #[tokio::test]
    async fn test_fails_open_after_disconnect() {
        let store = MemoryStore::connect(Duration::from_secs(60)).await;
        let gate = RateGate::new(Arc::clone(&store), "message");
        store.disconnect().await;

        assert!(gate.admit(Identity(1), Duration::from_secs(60)).await);
        assert!(gate.admit(Identity(1), Duration::from_secs(60)).await);
    }
}
