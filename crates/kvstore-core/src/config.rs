//! Notification engine configuration.

/// Default capacity of each subscription's event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Configuration for the notification registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Maximum number of undelivered events buffered per subscription.
    /// Events arriving at a full queue are dropped for that subscription.
    pub queue_capacity: usize,
}

impl WatchConfig {
    /// Create a configuration with the default queue capacity.
    pub fn new() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the per-subscription queue capacity (minimum 1).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(WatchConfig::default().queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(WatchConfig::new().with_queue_capacity(0).queue_capacity, 1);
    }
}
