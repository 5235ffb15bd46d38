//! Change events broadcast to subscribers.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Kind of change recorded by a [`ChangeEvent`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
)]
pub enum ChangeType {
    /// Key was inserted or overwritten.
    Set,
    /// Key was removed. Reserved; the store never deletes.
    Delete,
}

impl ChangeType {
    /// Upper-case name used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Set => "SET",
            ChangeType::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed write, as seen by subscribers.
///
/// Events are built once per successful write and never mutated afterwards.
#[derive(
    Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct ChangeEvent {
    /// Type of change.
    pub change_type: ChangeType,
    /// The key that changed.
    pub key: String,
    /// The new value (empty for deletes).
    pub value: String,
    /// Commit time in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl ChangeEvent {
    /// Create a SET event.
    pub fn set(key: impl Into<String>, value: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            change_type: ChangeType::Set,
            key: key.into(),
            value: value.into(),
            timestamp_ms,
        }
    }

    /// Whether this event's key starts with `prefix`.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.key.starts_with(prefix)
    }
}
