//! Core error types.

use thiserror::Error;

/// Errors raised by the store and the notification registry.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller supplied an empty key or prefix. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),

    /// Handing an event to one subscriber's transport failed.
    ///
    /// Confined to that subscription; the writer never sees it.
    #[error("delivery failure: {0}")]
    DeliveryFailure(String),

    /// The registry is shutting down and no longer accepts subscriptions.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    /// Whether this error was caused by the caller's input.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }
}
