//! Client configuration.

use std::time::Duration;

use kvstore_proto::framing::MAX_MESSAGE_SIZE;

/// Default address of a kvstore server.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:50051";

/// Default timeout for connecting and for each unary request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (e.g., "127.0.0.1:50051").
    pub address: String,

    /// Connect and request timeout. Subscription streams wait indefinitely
    /// for events once established.
    pub timeout: Duration,

    /// Maximum request size in bytes.
    pub max_message_size: usize,
}

impl ClientConfig {
    /// Create a new client configuration with the specified address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Create a configuration for connecting to localhost on the default port.
    pub fn localhost() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum message size, capped at the protocol limit.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.min(MAX_MESSAGE_SIZE);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::localhost()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.max_message_size, MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new("10.0.0.5:6000")
            .with_timeout(Duration::from_secs(1))
            .with_max_message_size(usize::MAX);

        assert_eq!(config.address, "10.0.0.5:6000");
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.max_message_size, MAX_MESSAGE_SIZE);
    }
}
