//! kvstore client API.
//!
//! This module provides the main `Client` struct for interacting with a
//! kvstore server.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

use kvstore_proto::{Request, Response, ResponsePayload, Status};

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState};
use crate::error::Error;
use crate::subscription::EventStream;

/// Outcome of a set request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetResult {
    /// Whether the write was applied.
    pub success: bool,
    /// Server message.
    pub message: String,
}

/// A kvstore client.
///
/// Unary requests share one connection. Each [`subscribe`](Client::subscribe)
/// opens a dedicated connection for its event stream.
///
/// # Example
///
/// ```ignore
/// use kvstore_client::{Client, ClientConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::connect(ClientConfig::localhost()).await?;
///
///     let mut events = client.subscribe("user:").await?;
///     client.set("user:123", "Alice").await?;
///
///     if let Some(event) = events.next_event().await? {
///         println!("{} {} = {}", event.change_type, event.key, event.value);
///     }
///     Ok(())
/// }
/// ```
pub struct Client {
    config: ClientConfig,
    connection: Mutex<Connection>,
    next_request_id: AtomicU64,
}

impl Client {
    /// Connect to a kvstore server.
    pub async fn connect(config: ClientConfig) -> Result<Self, Error> {
        let connection = Connection::establish(config.clone()).await?;

        Ok(Self {
            config,
            connection: Mutex::new(connection),
            next_request_id: AtomicU64::new(1),
        })
    }

    /// Connect to a server at the given address.
    pub async fn connect_to(address: impl Into<String>) -> Result<Self, Error> {
        Self::connect(ClientConfig::new(address)).await
    }

    /// Read the value stored under `key`. `None` means the key was never set.
    pub async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let request = Request::get(self.next_request_id(), key);
        let response = self.send_request(&request).await?;

        self.handle_response(response, |payload| match payload {
            ResponsePayload::Value { value, found } => Ok(found.then_some(value)),
            _ => Err(Error::UnexpectedResponse("value")),
        })
    }

    /// Store `value` under `key`.
    pub async fn set(&self, key: &str, value: &str) -> Result<SetResult, Error> {
        let request = Request::set(self.next_request_id(), key, value);
        let response = self.send_request(&request).await?;

        self.handle_response(response, |payload| match payload {
            ResponsePayload::Stored { success, message } => Ok(SetResult { success, message }),
            _ => Err(Error::UnexpectedResponse("stored")),
        })
    }

    /// Ping the server to check connectivity.
    pub async fn ping(&self) -> Result<(), Error> {
        let request = Request::ping(self.next_request_id());
        let response = self.send_request(&request).await?;

        self.handle_response(response, |payload| match payload {
            ResponsePayload::Pong => Ok(()),
            _ => Err(Error::UnexpectedResponse("pong")),
        })
    }

    /// Subscribe to changes of keys starting with `prefix`.
    ///
    /// Returns once the server has registered the subscription, so every
    /// write that completes afterwards is observed by the stream.
    pub async fn subscribe(&self, prefix: &str) -> Result<EventStream, Error> {
        let mut connection = Connection::establish(self.config.clone()).await?;

        let request = Request::subscribe(self.next_request_id(), prefix);
        let response = connection.send_request(&request).await?;

        let subscription_id = self.handle_response(response, |payload| match payload {
            ResponsePayload::Subscribed { subscription_id } => Ok(subscription_id),
            _ => Err(Error::UnexpectedResponse("subscribed")),
        })?;

        tracing::debug!(subscription_id, prefix, "subscribed");
        Ok(EventStream::new(connection, subscription_id, prefix.to_string()))
    }

    /// Close the client connection.
    pub async fn close(&self) {
        let mut conn = self.connection.lock().await;
        conn.close();
    }

    /// Check if the client is connected.
    pub async fn is_connected(&self) -> bool {
        let conn = self.connection.lock().await;
        conn.is_connected()
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Send on the shared connection, replacing it first if an earlier
    /// timeout or failure closed it.
    async fn send_request(&self, request: &Request) -> Result<Response, Error> {
        let mut conn = self.connection.lock().await;
        if conn.state() == ConnectionState::Closed {
            tracing::debug!(address = %self.config.address, "reconnecting");
            *conn = Connection::establish(self.config.clone()).await?;
        }
        conn.send_request(request).await
    }

    /// Handle a response, extracting the payload or converting errors.
    fn handle_response<T, F>(&self, response: Response, extract: F) -> Result<T, Error>
    where
        F: FnOnce(ResponsePayload) -> Result<T, Error>,
    {
        match response.status {
            Status::Ok => extract(response.payload),
            Status::Error { code, message } => Err(Error::Server { code, message }),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("address", &self.config.address)
            .field("next_request_id", &self.next_request_id.load(Ordering::SeqCst))
            .finish()
    }
}
