//! Prefix-keyed subscription registry and fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use kvstore_proto::ChangeEvent;

use super::subscription::{Subscription, SubscriptionId};
use crate::config::WatchConfig;
use crate::error::Error;

/// Producer side of one subscription's queue.
#[derive(Debug)]
struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::Sender<Arc<ChangeEvent>>,
}

/// Fan-out counters.
#[derive(Debug, Default)]
struct RegistryStats {
    published: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of the registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    /// Events passed to `publish`.
    pub published: u64,
    /// Successful enqueues across all subscriptions.
    pub enqueued: u64,
    /// Enqueue attempts rejected because a queue was full or draining.
    pub dropped: u64,
}

/// Outcome of a single `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscriptions whose prefix matched the event key.
    pub matched: usize,
    /// Subscriptions the event was queued for.
    pub enqueued: usize,
    /// Matching subscriptions that did not get the event.
    pub dropped: usize,
}

/// State shared between the registry and every live subscription handle.
pub(crate) struct RegistryInner {
    /// Subscribers grouped by prefix. Never holds an empty list.
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    config: WatchConfig,
    shutdown: CancellationToken,
    stats: RegistryStats,
}

impl std::fmt::Debug for RegistryInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryInner")
            .field("prefixes", &self.subscribers.read().len())
            .field("next_id", &self.next_id)
            .field("config", &self.config)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RegistryInner {
    /// Remove one subscriber by identity, dropping the prefix entry if it
    /// became empty. Returns false if it was not registered.
    pub(crate) fn remove(&self, prefix: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();

        let Some(list) = subscribers.get_mut(prefix) else {
            return false;
        };

        let before = list.len();
        list.retain(|s| s.id != id);
        let removed = list.len() != before;

        if list.is_empty() {
            subscribers.remove(prefix);
        }

        removed
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

/// Registry of active prefix subscriptions.
///
/// Cloning is cheap; clones share the same subscription set.
///
/// # Locking
///
/// The prefix map sits behind a single `RwLock`. `publish` holds the read
/// side for the whole fan-out, so a subscription added or removed
/// concurrently either sees the complete fan-out or none of it. Each
/// subscription's queue is a bounded single-consumer channel and is written
/// without taking the map's write lock.
#[derive(Debug, Clone)]
pub struct NotificationRegistry {
    inner: Arc<RegistryInner>,
}

impl NotificationRegistry {
    /// Create an empty registry.
    pub fn new(config: WatchConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                config,
                shutdown: CancellationToken::new(),
                stats: RegistryStats::default(),
            }),
        }
    }

    /// Register interest in every future write whose key starts with `prefix`.
    ///
    /// Events published before this call are never replayed.
    pub fn subscribe(&self, prefix: &str) -> Result<Subscription, Error> {
        if prefix.is_empty() {
            return Err(Error::InvalidArgument("prefix cannot be empty".to_string()));
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Unavailable("registry is shutting down".to_string()));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.config.queue_capacity.max(1));

        let total_subscribers = {
            let mut subscribers = self.inner.subscribers.write();
            let list = subscribers.entry(prefix.to_string()).or_default();
            list.push(Subscriber { id, sender });
            list.len()
        };

        info!(
            subscription_id = id,
            prefix,
            total_subscribers,
            "subscriber registered"
        );

        Ok(Subscription::new(
            id,
            prefix.to_string(),
            receiver,
            Arc::clone(&self.inner),
        ))
    }

    /// Deregister `subscription`. Calling this on an already removed handle
    /// is a no-op.
    pub fn unsubscribe(&self, subscription: &mut Subscription) {
        subscription.unsubscribe();
    }

    /// Offer `event` to every subscription whose prefix matches its key.
    ///
    /// Never blocks: a subscription with a full queue simply misses the event.
    pub fn publish(&self, event: ChangeEvent) -> PublishReport {
        let event = Arc::new(event);
        let mut report = PublishReport::default();

        {
            let subscribers = self.inner.subscribers.read();

            for (prefix, list) in subscribers.iter() {
                if !event.matches_prefix(prefix) {
                    continue;
                }

                for subscriber in list {
                    report.matched += 1;
                    match subscriber.sender.try_send(Arc::clone(&event)) {
                        Ok(()) => report.enqueued += 1,
                        Err(TrySendError::Full(_)) => {
                            report.dropped += 1;
                            warn!(
                                subscription_id = subscriber.id,
                                prefix = %prefix,
                                key = %event.key,
                                "subscriber queue full, skipping event"
                            );
                        }
                        Err(TrySendError::Closed(_)) => {
                            report.dropped += 1;
                            trace!(
                                subscription_id = subscriber.id,
                                key = %event.key,
                                "subscriber draining, skipping event"
                            );
                        }
                    }
                }
            }
        }

        let stats = &self.inner.stats;
        stats.published.fetch_add(1, Ordering::Relaxed);
        stats
            .enqueued
            .fetch_add(report.enqueued as u64, Ordering::Relaxed);
        stats
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);

        if report.enqueued > 0 {
            debug!(
                key = %event.key,
                subscriber_count = report.enqueued,
                "notified subscribers"
            );
        }

        report
    }

    /// Signal every delivery loop to stop and refuse new subscriptions.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!(
                active_subscriptions = self.total_subscribers(),
                "shutting down notification registry"
            );
            self.inner.shutdown.cancel();
        }
    }

    /// Whether `shutdown` has been called.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Number of subscriptions registered under exactly `prefix`.
    pub fn subscriber_count(&self, prefix: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .get(prefix)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of distinct registered prefixes.
    pub fn prefix_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Number of subscriptions across all prefixes.
    pub fn total_subscribers(&self) -> usize {
        self.inner.subscribers.read().values().map(Vec::len).sum()
    }

    /// Capacity of each subscription queue.
    pub fn queue_capacity(&self) -> usize {
        self.inner.config.queue_capacity
    }

    /// Snapshot of the fan-out counters.
    pub fn stats(&self) -> RegistryStatsSnapshot {
        let stats = &self.inner.stats;
        RegistryStatsSnapshot {
            published: stats.published.load(Ordering::Relaxed),
            enqueued: stats.enqueued.load(Ordering::Relaxed),
            dropped: stats.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for NotificationRegistry {
    fn default() -> Self {
        Self::new(WatchConfig::default())
    }
}
