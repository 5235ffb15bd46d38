//! Request and response message types.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use crate::event::ChangeEvent;
use crate::framing::encode_frame;
use crate::Error;

/// A request from client to server.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct Request {
    /// Unique request identifier for correlation.
    pub id: u64,
    /// The operation to perform.
    pub operation: Operation,
}

/// Operations that can be requested.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum Operation {
    /// Read the value stored under a key.
    Get {
        /// Key to look up.
        key: String,
    },
    /// Store a value under a key, overwriting any previous value.
    Set {
        /// Key to write.
        key: String,
        /// New value.
        value: String,
    },
    /// Stream every subsequent write whose key starts with `prefix`.
    ///
    /// The connection carrying this request is dedicated to the stream
    /// from then on.
    Subscribe {
        /// Key prefix to match.
        prefix: String,
    },
    /// Ping the server.
    Ping,
}

impl Operation {
    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Get { .. } => "Get",
            Operation::Set { .. } => "Set",
            Operation::Subscribe { .. } => "Subscribe",
            Operation::Ping => "Ping",
        }
    }
}

impl Request {
    /// Create a get request.
    pub fn get(id: u64, key: impl Into<String>) -> Self {
        Self {
            id,
            operation: Operation::Get { key: key.into() },
        }
    }

    /// Create a set request.
    pub fn set(id: u64, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id,
            operation: Operation::Set {
                key: key.into(),
                value: value.into(),
            },
        }
    }

    /// Create a subscribe request.
    pub fn subscribe(id: u64, prefix: impl Into<String>) -> Self {
        Self {
            id,
            operation: Operation::Subscribe {
                prefix: prefix.into(),
            },
        }
    }

    /// Create a ping request.
    pub fn ping(id: u64) -> Self {
        Self {
            id,
            operation: Operation::Ping,
        }
    }

    /// Serialize and frame this request.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let payload = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| Error::Serialization(format!("failed to serialize request: {}", e)))?;
        encode_frame(&payload)
    }

    /// Decode a request from a frame payload (without the length prefix).
    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        // rkyv requires an aligned buffer
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(payload);

        rkyv::from_bytes::<Request, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(format!("failed to deserialize request: {}", e)))
    }
}

/// A response from server to client.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub struct Response {
    /// Request ID this response correlates to.
    pub id: u64,
    /// Response status.
    pub status: Status,
    /// Response payload.
    pub payload: ResponsePayload,
}

/// Response status.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum Status {
    /// Request succeeded.
    Ok,
    /// Request failed with an error.
    Error {
        /// Error code for programmatic handling.
        code: u32,
        /// Human-readable error message.
        message: String,
    },
}

impl Status {
    /// Create a success status.
    pub fn ok() -> Self {
        Status::Ok
    }

    /// Create an error status.
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Status::Error {
            code,
            message: message.into(),
        }
    }

    /// Check if this is a success status.
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Check if this is an error status.
    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error { .. })
    }
}

/// Response payload variants.
#[derive(
    Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
pub enum ResponsePayload {
    /// Result of a get. `value` is empty when `found` is false.
    Value {
        /// Stored value.
        value: String,
        /// Whether the key exists.
        found: bool,
    },
    /// Result of a set.
    Stored {
        /// Whether the write was applied.
        success: bool,
        /// Human-readable outcome.
        message: String,
    },
    /// Subscription accepted; events follow on this connection.
    Subscribed {
        /// Server-assigned subscription ID.
        subscription_id: u64,
    },
    /// One streamed change event.
    Event(ChangeEvent),
    /// Pong response to ping.
    Pong,
    /// Empty payload (for errors).
    Empty,
}

impl Response {
    /// Create a get response.
    pub fn value(id: u64, value: Option<String>) -> Self {
        let found = value.is_some();
        Self {
            id,
            status: Status::ok(),
            payload: ResponsePayload::Value {
                value: value.unwrap_or_default(),
                found,
            },
        }
    }

    /// Create a set response.
    pub fn stored(id: u64, success: bool, message: impl Into<String>) -> Self {
        Self {
            id,
            status: Status::ok(),
            payload: ResponsePayload::Stored {
                success,
                message: message.into(),
            },
        }
    }

    /// Create a subscription accepted response.
    pub fn subscribed(id: u64, subscription_id: u64) -> Self {
        Self {
            id,
            status: Status::ok(),
            payload: ResponsePayload::Subscribed { subscription_id },
        }
    }

    /// Create a streamed event response.
    pub fn event(id: u64, event: ChangeEvent) -> Self {
        Self {
            id,
            status: Status::ok(),
            payload: ResponsePayload::Event(event),
        }
    }

    /// Create a pong response.
    pub fn pong(id: u64) -> Self {
        Self {
            id,
            status: Status::ok(),
            payload: ResponsePayload::Pong,
        }
    }

    /// Create an error response.
    pub fn error(id: u64, code: u32, message: impl Into<String>) -> Self {
        Self {
            id,
            status: Status::error(code, message),
            payload: ResponsePayload::Empty,
        }
    }

    /// Serialize and frame this response.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let payload = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| Error::Serialization(format!("failed to serialize response: {}", e)))?;
        encode_frame(&payload)
    }

    /// Decode a response from a frame payload (without the length prefix).
    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(payload);

        rkyv::from_bytes::<Response, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(format!("failed to deserialize response: {}", e)))
    }
}

/// Standard error codes.
pub mod error_codes {
    /// Unknown/internal error.
    pub const INTERNAL: u32 = 1;
    /// Empty key, empty prefix, or otherwise malformed argument.
    pub const INVALID_ARGUMENT: u32 = 2;
    /// Server is shutting down.
    pub const UNAVAILABLE: u32 = 3;
    /// Request could not be decoded.
    pub const PROTOCOL: u32 = 4;
}
