//! Transport-facing side of a subscription.

use std::future::Future;

use tokio::sync::mpsc;

use kvstore_proto::ChangeEvent;

use crate::error::Error;

/// Destination for one subscription's events, usually a client stream.
///
/// An error from `deliver` is fatal for that subscription only: the delivery
/// loop stops and deregisters it.
pub trait EventSink: Send {
    /// Hand one event to the remote caller.
    fn deliver(&mut self, event: &ChangeEvent) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Why a delivery loop stopped.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// The caller's cancellation token fired (client went away).
    Cancelled,
    /// The registry was shut down.
    Shutdown,
    /// The event queue closed.
    Closed,
    /// The sink rejected an event.
    Failed(Error),
}

impl DeliveryOutcome {
    /// Short label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Cancelled => "cancelled",
            DeliveryOutcome::Shutdown => "shutdown",
            DeliveryOutcome::Closed => "closed",
            DeliveryOutcome::Failed(_) => "failed",
        }
    }
}

/// Sink that forwards events into a tokio channel.
///
/// Useful for in-process consumers. Delivery fails once the receiving half
/// is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<ChangeEvent>,
}

impl ChannelSink {
    /// Wrap a channel sender.
    pub fn new(sender: mpsc::Sender<ChangeEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    async fn deliver(&mut self, event: &ChangeEvent) -> Result<(), Error> {
        self.sender
            .send(event.clone())
            .await
            .map_err(|_| Error::DeliveryFailure("receiver dropped".to_string()))
    }
}
