//! Concurrent in-memory key-value store.

use dashmap::DashMap;

use kvstore_proto::ChangeEvent;

use crate::error::Error;

/// Thread-safe map from key to value.
///
/// Reads and writes to different keys proceed in parallel; writes to the
/// same key race and the last one committed wins. There is no delete.
#[derive(Debug, Default)]
pub struct Store {
    entries: DashMap<String, String>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Look up the value stored under `key`.
    ///
    /// Returns `None` for a key that was never written.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Store `value` under `key`, overwriting any previous value.
    ///
    /// The write is visible to subsequent `get` calls from any thread before
    /// this returns. The returned event carries the commit timestamp and is
    /// meant to be handed to the notification registry.
    pub fn set(&self, key: &str, value: &str) -> Result<ChangeEvent, Error> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("key cannot be empty".to_string()));
        }

        self.entries.insert(key.to_string(), value.to_string());
        let timestamp_ms = chrono::Utc::now().timestamp_millis();

        Ok(ChangeEvent::set(key, value, timestamp_ms))
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
