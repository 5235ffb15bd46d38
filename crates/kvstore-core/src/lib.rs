//! kvstore core: in-memory store plus the prefix subscription engine.
//!
//! [`Store`] holds the key-value pairs, [`NotificationRegistry`] fans each
//! committed write out to the subscriptions whose prefix matches, and
//! [`KvService`] ties the two together behind the operations exposed to
//! clients.

pub mod config;
pub mod error;
pub mod notify;
pub mod service;
pub mod store;

pub use config::WatchConfig;
pub use error::Error;
pub use notify::{
    ChannelSink, DeliveryOutcome, EventSink, NotificationRegistry, PublishReport, Subscription,
    SubscriptionId, SubscriptionState,
};
pub use service::{KvService, SetOutcome};
pub use store::Store;

pub use kvstore_proto::{ChangeEvent, ChangeType};
