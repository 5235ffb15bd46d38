//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failed or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] kvstore_proto::Error),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// The server answered with an error status.
    #[error("server error ({code}): {message}")]
    Server {
        /// Error code from [`kvstore_proto::error_codes`].
        code: u32,
        /// Error message.
        message: String,
    },

    /// The server answered with a payload of the wrong kind.
    #[error("unexpected response: expected {0}")]
    UnexpectedResponse(&'static str),
}

impl Error {
    /// Check if the server rejected the request's arguments.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Error::Server { code, .. } if *code == kvstore_proto::error_codes::INVALID_ARGUMENT
        )
    }

    /// Check if the server refused the request because it is shutting down.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Server { code, .. } if *code == kvstore_proto::error_codes::UNAVAILABLE
        )
    }
}
