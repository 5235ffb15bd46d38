//! Client-facing operations over the store and the registry.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::WatchConfig;
use crate::error::Error;
use crate::notify::{NotificationRegistry, Subscription};
use crate::store::Store;

/// Message returned by a successful set.
pub const STORED_MESSAGE: &str = "key stored successfully";

/// Result of a set operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    /// Whether the write was applied.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
}

/// The key-value service: validated reads, writes that notify subscribers,
/// and prefix subscriptions.
///
/// Cloning is cheap; request handlers each hold a clone.
#[derive(Debug, Clone)]
pub struct KvService {
    store: Arc<Store>,
    registry: NotificationRegistry,
}

impl KvService {
    /// Create a service with an empty store.
    pub fn new(config: WatchConfig) -> Self {
        info!(
            queue_capacity = config.queue_capacity,
            "initializing KV store service"
        );
        Self {
            store: Arc::new(Store::new()),
            registry: NotificationRegistry::new(config),
        }
    }

    /// Read the value for `key`. `Ok(None)` means the key was never written.
    pub fn get(&self, key: &str) -> Result<Option<String>, Error> {
        if key.is_empty() {
            warn!("get request with empty key");
            return Err(Error::InvalidArgument("key cannot be empty".to_string()));
        }

        let value = self.store.get(key);
        if value.is_none() {
            info!(key, "key not found");
        }
        Ok(value)
    }

    /// Write `value` under `key` and notify matching subscribers.
    ///
    /// Subscriber-side problems (full queues, closed streams) never surface
    /// here.
    pub fn set(&self, key: &str, value: &str) -> Result<SetOutcome, Error> {
        if key.is_empty() {
            warn!("set request with empty key");
            return Err(Error::InvalidArgument("key cannot be empty".to_string()));
        }

        let event = self.store.set(key, value)?;
        self.registry.publish(event);

        info!(key, value_length = value.len(), "key stored successfully");

        Ok(SetOutcome {
            success: true,
            message: STORED_MESSAGE.to_string(),
        })
    }

    /// Subscribe to writes whose key starts with `prefix`.
    pub fn subscribe(&self, prefix: &str) -> Result<Subscription, Error> {
        if prefix.is_empty() {
            warn!("subscribe request with empty prefix");
        }
        self.registry.subscribe(prefix)
    }

    /// Stop all subscription streams and refuse new ones.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }

    /// Underlying store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Underlying notification registry.
    pub fn registry(&self) -> &NotificationRegistry {
        &self.registry
    }
}

impl Default for KvService {
    fn default() -> Self {
        Self::new(WatchConfig::default())
    }
}
