//! Subscription handle and its delivery loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kvstore_proto::ChangeEvent;

use super::delivery::{DeliveryOutcome, EventSink};
use super::registry::RegistryInner;

/// Identifier assigned to each subscription, unique per registry.
pub type SubscriptionId = u64;

/// Lifecycle of a subscription.
///
/// `Registered -> Draining -> Removed`. `Removed` is reached exactly once,
/// whichever of disconnect, delivery error, shutdown, or drop triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Receiving events.
    Registered,
    /// Queue closed to new events; leftover events are being discarded.
    Draining,
    /// Deregistered from the registry. Terminal.
    Removed,
}

/// One active interest registration.
///
/// The handle owns the consumer side of the subscription's bounded queue.
/// Dropping it deregisters the subscription.
pub struct Subscription {
    id: SubscriptionId,
    prefix: String,
    receiver: mpsc::Receiver<Arc<ChangeEvent>>,
    registry: Arc<RegistryInner>,
    state: SubscriptionState,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("prefix", &self.prefix)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        prefix: String,
        receiver: mpsc::Receiver<Arc<ChangeEvent>>,
        registry: Arc<RegistryInner>,
    ) -> Self {
        Self {
            id,
            prefix,
            receiver,
            registry,
            state: SubscriptionState::Registered,
        }
    }

    /// Subscription identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Prefix this subscription matches.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Wait for the next queued event.
    ///
    /// Returns `None` once the subscription is no longer registered or the
    /// registry shuts down. Events still queued at shutdown are not returned.
    pub async fn recv(&mut self) -> Option<Arc<ChangeEvent>> {
        if self.state != SubscriptionState::Registered {
            return None;
        }

        let shutdown = self.registry.shutdown_token().clone();
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            event = self.receiver.recv() => event,
        }
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<ChangeEvent>> {
        if self.state != SubscriptionState::Registered {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    /// Drain events into `sink` until `cancel` fires, the registry shuts
    /// down, or the sink fails, then deregister.
    ///
    /// Consumes the handle, so the loop and its cleanup run exactly once.
    pub async fn run<S: EventSink>(
        mut self,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> DeliveryOutcome {
        let shutdown = self.registry.shutdown_token().clone();
        let mut delivered: u64 = 0;

        let outcome = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break DeliveryOutcome::Cancelled,
                _ = shutdown.cancelled() => break DeliveryOutcome::Shutdown,
                event = self.receiver.recv() => match event {
                    Some(event) => event,
                    None => break DeliveryOutcome::Closed,
                },
            };

            // a stalled transport must not hold the subscription past cancellation
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break DeliveryOutcome::Cancelled,
                _ = shutdown.cancelled() => break DeliveryOutcome::Shutdown,
                result = sink.deliver(&event) => result,
            };

            match result {
                Ok(()) => {
                    delivered += 1;
                    debug!(
                        subscription_id = self.id,
                        prefix = %self.prefix,
                        key = %event.key,
                        "event sent to subscriber"
                    );
                }
                Err(e) => {
                    warn!(
                        subscription_id = self.id,
                        prefix = %self.prefix,
                        error = %e,
                        "failed to send event to subscriber"
                    );
                    break DeliveryOutcome::Failed(e);
                }
            }
        };

        info!(
            subscription_id = self.id,
            prefix = %self.prefix,
            delivered,
            reason = outcome.as_str(),
            "subscription stream ended"
        );

        self.unsubscribe();
        outcome
    }

    /// Deregister this subscription. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.state == SubscriptionState::Removed {
            return;
        }

        self.begin_drain();

        let removed = self.registry.remove(&self.prefix, self.id);
        self.state = SubscriptionState::Removed;

        info!(
            subscription_id = self.id,
            prefix = %self.prefix,
            removed,
            "subscriber unregistered"
        );
    }

    /// Close the queue to producers and throw away anything left in it.
    fn begin_drain(&mut self) {
        if self.state != SubscriptionState::Registered {
            return;
        }
        self.state = SubscriptionState::Draining;
        self.receiver.close();

        let mut discarded = 0usize;
        while self.receiver.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(
                subscription_id = self.id,
                discarded,
                "discarded undelivered events"
            );
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::Error;
    use crate::notify::{ChannelSink, NotificationRegistry};
    use crate::WatchConfig;

    /// Records delivered keys and fails on a chosen key.
    struct RecordingSink {
        keys: Vec<String>,
        fail_on: Option<String>,
    }

    impl EventSink for RecordingSink {
        async fn deliver(&mut self, event: &ChangeEvent) -> Result<(), Error> {
            if self.fail_on.as_deref() == Some(event.key.as_str()) {
                return Err(Error::DeliveryFailure("stream reset".to_string()));
            }
            self.keys.push(event.key.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_recv_in_order() {
        let registry = NotificationRegistry::default();
        let mut sub = registry.subscribe("a").unwrap();

        registry.publish(ChangeEvent::set("a1", "x", 1));
        registry.publish(ChangeEvent::set("a2", "y", 2));

        assert_eq!(sub.recv().await.unwrap().key, "a1");
        assert_eq!(sub.recv().await.unwrap().key, "a2");
        assert_eq!(sub.state(), SubscriptionState::Registered);
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_shutdown() {
        let registry = NotificationRegistry::default();
        let mut sub = registry.subscribe("a").unwrap();
        registry.publish(ChangeEvent::set("a1", "x", 1));

        registry.shutdown();
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_unsubscribe_discards_queue() {
        let registry = NotificationRegistry::default();
        let mut sub = registry.subscribe("a").unwrap();
        registry.publish(ChangeEvent::set("a1", "x", 1));

        sub.unsubscribe();
        assert_eq!(sub.state(), SubscriptionState::Removed);
        assert!(sub.try_recv().is_none());
        assert_eq!(registry.subscriber_count("a"), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let registry = NotificationRegistry::default();
        let sub = registry.subscribe("user:").unwrap();
        let cancel = CancellationToken::new();

        let (tx, mut rx) = mpsc::channel(8);
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut sink = ChannelSink::new(tx);
                sub.run(&mut sink, &cancel).await
            })
        };

        registry.publish(ChangeEvent::set("user:1", "Alice", 1));
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.value, "Alice");

        cancel.cancel();
        let outcome = task.await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Cancelled));
        assert_eq!(registry.subscriber_count("user:"), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let registry = NotificationRegistry::default();
        let sub = registry.subscribe("user:").unwrap();
        let cancel = CancellationToken::new();
        let mut sink = RecordingSink {
            keys: Vec::new(),
            fail_on: None,
        };

        registry.shutdown();
        let outcome = sub.run(&mut sink, &cancel).await;

        assert!(matches!(outcome, DeliveryOutcome::Shutdown));
        assert_eq!(registry.total_subscribers(), 0);
    }

    #[tokio::test]
    async fn test_run_deregisters_on_delivery_failure() {
        let registry = NotificationRegistry::new(WatchConfig::new().with_queue_capacity(10));
        let sub = registry.subscribe("k").unwrap();
        let survivor = registry.subscribe("k").unwrap();
        let cancel = CancellationToken::new();

        registry.publish(ChangeEvent::set("k1", "v", 1));
        registry.publish(ChangeEvent::set("k2", "v", 2));
        registry.publish(ChangeEvent::set("k3", "v", 3));

        let mut sink = RecordingSink {
            keys: Vec::new(),
            fail_on: Some("k2".to_string()),
        };
        let outcome = sub.run(&mut sink, &cancel).await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::Failed(Error::DeliveryFailure(_))
        ));
        assert_eq!(sink.keys, vec!["k1"]);
        assert_eq!(registry.subscriber_count("k"), 1);

        // the other subscription is unaffected
        let report = registry.publish(ChangeEvent::set("k4", "v", 4));
        assert_eq!(report.matched, 1);
        assert_eq!(survivor.state(), SubscriptionState::Registered);
    }
}
