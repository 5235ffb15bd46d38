//! Prefix subscriptions and change-event fan-out.
//!
//! ```text
//! KvService::set()
//!     │ Store::set() -> ChangeEvent
//!     ▼
//! NotificationRegistry::publish()      (read lock on prefix map)
//!     │ try_send per matching subscription, drop if full
//!     ▼
//! Subscription queue                   (bounded, FIFO)
//!     │
//!     ▼
//! Subscription::run() -> EventSink     (one loop per subscription)
//! ```
//!
//! Delivery is at-most-once and best effort. A subscriber that falls behind
//! by more than its queue capacity loses events without notice; the writer is
//! never slowed down or told about it.

mod delivery;
mod registry;
mod subscription;

pub use delivery::{ChannelSink, DeliveryOutcome, EventSink};
pub use registry::{NotificationRegistry, PublishReport, RegistryStatsSnapshot};
pub use subscription::{Subscription, SubscriptionId, SubscriptionState};
