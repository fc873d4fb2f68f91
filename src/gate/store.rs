//! Key-value store with expiring markers.
//!
//! The store is an explicitly constructed client: callers create it with
//! [`MemoryStore::connect`], pass it where it is needed, and shut it down
//! with [`MemoryStore::disconnect`]. Calls made after disconnecting fail
//! with [`StoreError::Disconnected`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Errors raised by a key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store is disconnected")]
    Disconnected,

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Atomic primitive behind the rate gate.
pub trait KeyValueStore: Send + Sync {
    /// Installs `key` with the given time-to-live unless an unexpired entry exists.
    ///
    /// Returns `true` if the key was installed, `false` if it was already present.
    /// Check and install happen as one atomic step.
    fn set_if_absent(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// In-process store keeping expiry instants per key.
#[derive(Debug)]
pub struct MemoryStore {
    /// Key to expiry instant.
    entries: Mutex<HashMap<String, Instant>>,

    /// Cleared by `disconnect`.
    connected: AtomicBool,

    /// Background task purging expired keys.
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStore {
    /// Creates a connected store without a background sweeper.
    ///
    /// Expired keys are still replaced lazily by `set_if_absent`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            sweeper: Mutex::new(None),
        }
    }

    /// Creates a connected store and starts a sweeper purging expired keys
    /// every `sweep_interval`.
    pub async fn connect(sweep_interval: Duration) -> Arc<Self> {
        let store = Arc::new(Self::new());
        let weak = Arc::downgrade(&store);
        let handle = tokio::spawn(sweep_loop(weak, sweep_interval));
        *store.sweeper.lock().await = Some(handle);

        info!("Key-value store connected (sweep every {:?})", sweep_interval);
        store
    }

    /// Stops the sweeper and drops all keys.
    pub async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);

        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.abort();
        }
        self.entries.lock().await.clear();

        info!("Key-value store disconnected");
    }

    /// Returns whether the store accepts calls.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Removes expired keys, returning how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    /// Returns the number of stored keys, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns whether the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        if !self.is_connected() {
            return Err(StoreError::Disconnected);
        }

        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        match entries.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                entries.insert(key.to_owned(), now + ttl);
                Ok(true)
            }
        }
    }
}

async fn sweep_loop(store: Weak<MemoryStore>, sweep_interval: Duration) {
    let mut timer = tokio::time::interval(sweep_interval);

    loop {
        timer.tick().await;

        let Some(store) = store.upgrade() else {
            break;
        };
        let purged = store.purge_expired().await;
        if purged > 0 {
            debug!("Purged {} expired keys", purged);
        }
    }
}
