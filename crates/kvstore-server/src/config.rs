//! Server configuration.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use kvstore_core::config::DEFAULT_QUEUE_CAPACITY;
use kvstore_core::WatchConfig;
use kvstore_proto::framing::MAX_MESSAGE_SIZE;

use crate::error::Error;

/// Default address for the key-value transport.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:50051";

/// Default address for the HTTP health endpoints.
pub const DEFAULT_HEALTH_ADDRESS: &str = "0.0.0.0:8080";

/// Default time allowed for connections to wind down on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// kvstore server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the key-value transport binds to (e.g., "0.0.0.0:50051").
    pub listen_address: String,

    /// Address the health listener binds to. None disables it.
    pub health_address: Option<String>,

    /// Subscription queue settings.
    pub watch: WatchConfig,

    /// Maximum accepted request size in bytes.
    pub max_message_size: usize,

    /// Time allowed for open connections to finish after shutdown starts.
    pub shutdown_timeout: Duration,

    /// Log output format.
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            health_address: Some(DEFAULT_HEALTH_ADDRESS.to_string()),
            watch: WatchConfig::default(),
            max_message_size: MAX_MESSAGE_SIZE,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            log_format: LogFormat::Text,
        }
    }

    /// Set the transport address.
    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = address.into();
        self
    }

    /// Set the health listener address.
    pub fn with_health_address(mut self, address: impl Into<String>) -> Self {
        self.health_address = Some(address.into());
        self
    }

    /// Disable the health listener.
    pub fn without_health(mut self) -> Self {
        self.health_address = None;
        self
    }

    /// Set the per-subscription queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.watch = self.watch.with_queue_capacity(capacity);
        self
    }

    /// Set the maximum message size, capped at the protocol limit.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.min(MAX_MESSAGE_SIZE);
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the log format.
    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Check if the health listener is enabled.
    pub fn has_health(&self) -> bool {
        self.health_address.is_some()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "kvstore-server")]
#[command(version, about = "kvstore key-value server", long_about = None)]
pub struct Args {
    /// Address to bind the key-value transport to.
    #[arg(short, long, env = "KVSTORE_LISTEN", default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen: String,

    /// Address to bind the health listener to.
    #[arg(long, env = "KVSTORE_HEALTH_LISTEN", default_value = DEFAULT_HEALTH_ADDRESS)]
    pub health_listen: String,

    /// Disable the health listener.
    #[arg(long)]
    pub no_health: bool,

    /// Events buffered per subscription before new ones are dropped.
    #[arg(long, env = "KVSTORE_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Seconds allowed for connections to close on shutdown.
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_TIMEOUT_SECS)]
    pub shutdown_timeout: u64,

    /// Maximum request size in megabytes.
    #[arg(long, default_value_t = 4)]
    pub max_message_mb: usize,

    /// Log output format.
    #[arg(long, env = "KVSTORE_LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    ///
    /// Message sizes above the protocol limit are capped to it.
    pub fn into_config(self) -> Result<ServerConfig, Error> {
        if self.max_message_mb == 0 {
            return Err(Error::Config("--max-message-mb must be at least 1".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("--queue-capacity must be at least 1".to_string()));
        }

        let health_address = if self.no_health {
            None
        } else {
            Some(self.health_listen)
        };

        Ok(ServerConfig {
            listen_address: self.listen,
            health_address,
            watch: WatchConfig::new().with_queue_capacity(self.queue_capacity),
            max_message_size: self
                .max_message_mb
                .saturating_mul(1024 * 1024)
                .min(MAX_MESSAGE_SIZE),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
            log_format: self.log_format,
        })
    }
}
