//! kvstore client - async client library for kvstore servers.
//!
//! # Quick Start
//!
//! ```ignore
//! use kvstore_client::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::connect(ClientConfig::localhost()).await?;
//!
//!     client.set("user:123", "Alice").await?;
//!     let value = client.get("user:123").await?;
//!     assert_eq!(value.as_deref(), Some("Alice"));
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod subscription;

pub use client::{Client, SetResult};
pub use config::ClientConfig;
pub use connection::{Connection, ConnectionState};
pub use error::Error;
pub use subscription::EventStream;

/// Re-export protocol types.
pub use kvstore_proto as proto;
