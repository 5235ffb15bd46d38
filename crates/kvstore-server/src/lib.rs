//! kvstore server library.
//!
//! Wires the core [`KvService`](kvstore_core::KvService) to the network: a
//! framed TCP transport for get/set/subscribe, and an HTTP listener for
//! liveness and readiness endpoints.

pub mod config;
pub mod error;
pub mod handler;
pub mod health;
pub mod transport;

pub use config::{Args, LogFormat, ServerConfig};
pub use error::Error;
pub use handler::RequestHandler;
pub use transport::{Transport, TransportMetrics};
