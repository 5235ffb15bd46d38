//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Store or registry error.
    #[error("{0}")]
    Core(#[from] kvstore_core::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] kvstore_proto::Error),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
