//! kvstore protocol types and serialization.
//!
//! This crate defines the wire protocol spoken between kvstore servers and
//! clients, using rkyv for serialization and a 4-byte length prefix for
//! framing.
//!
//! # Modules
//!
//! - [`event`] - Change events delivered to subscribers
//! - [`message`] - Request/response message wrappers
//! - [`framing`] - Length-prefix framing and async frame IO
//! - [`error`] - Protocol error types
//!
//! # Streaming
//!
//! A `Subscribe` request is answered once with
//! [`ResponsePayload::Subscribed`]; after that the server only writes
//! [`ResponsePayload::Event`] frames on the connection until either side
//! closes it.

pub mod error;
pub mod event;
pub mod framing;
pub mod message;

pub use error::Error;

pub use event::{ChangeEvent, ChangeType};
pub use message::{error_codes, Operation, Request, Response, ResponsePayload, Status};

/// Protocol version for wire compatibility.
pub const PROTOCOL_VERSION: u32 = 1;
