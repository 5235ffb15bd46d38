//! Connection management for the kvstore client.

use tokio::net::TcpStream;
use tokio::time::timeout;

use kvstore_proto::framing::{read_frame, write_frame, LENGTH_PREFIX_SIZE};
use kvstore_proto::{Request, Response};

use crate::config::ClientConfig;
use crate::error::Error;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Serving unary requests.
    Ready,
    /// Dedicated to a subscription stream.
    Streaming,
    /// Connection closed.
    Closed,
}

/// A framed TCP connection to a kvstore server.
pub struct Connection {
    stream: TcpStream,
    state: ConnectionState,
    config: ClientConfig,
}

impl Connection {
    /// Establish a new connection to the server.
    pub async fn establish(config: ClientConfig) -> Result<Self, Error> {
        let stream = timeout(config.timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|e| {
                Error::Connection(format!("failed to connect to {}: {}", config.address, e))
            })?;

        stream
            .set_nodelay(true)
            .map_err(|e| Error::Connection(format!("failed to set TCP_NODELAY: {}", e)))?;

        tracing::debug!(address = %config.address, "connected");

        Ok(Self {
            stream,
            state: ConnectionState::Ready,
            config,
        })
    }

    /// Send a request and wait (up to the configured timeout) for its response.
    pub async fn send_request(&mut self, request: &Request) -> Result<Response, Error> {
        if self.state != ConnectionState::Ready {
            return Err(Error::Connection(format!(
                "cannot send request in state {:?}",
                self.state
            )));
        }

        let frame = request.encode()?;
        if frame.len() - LENGTH_PREFIX_SIZE > self.config.max_message_size {
            return Err(Error::Protocol(kvstore_proto::Error::InvalidMessage(format!(
                "request too large: {} bytes (max: {})",
                frame.len() - LENGTH_PREFIX_SIZE,
                self.config.max_message_size
            ))));
        }

        let response = timeout(self.config.timeout, async {
            self.write(&frame).await?;
            self.read_response().await
        })
        .await;

        // a late reply or half-written frame leaves the stream out of step
        let response = match response {
            Err(_) => {
                self.state = ConnectionState::Closed;
                return Err(Error::Timeout);
            }
            Ok(response) => response,
        };

        let response = match response {
            Ok(Some(response)) => response,
            Ok(None) => {
                self.state = ConnectionState::Closed;
                return Err(Error::Connection("server closed connection".to_string()));
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                return Err(e);
            }
        };

        if response.id != request.id {
            self.state = ConnectionState::Closed;
            return Err(Error::Protocol(kvstore_proto::Error::InvalidMessage(format!(
                "response ID mismatch: expected {}, got {}",
                request.id, response.id
            ))));
        }

        Ok(response)
    }

    /// Read the next response frame. `Ok(None)` means the server closed the
    /// connection cleanly.
    pub async fn read_response(&mut self) -> Result<Option<Response>, Error> {
        match read_frame(&mut self.stream).await {
            Ok(Some(payload)) => Ok(Some(Response::decode(&payload)?)),
            Ok(None) => Ok(None),
            Err(kvstore_proto::Error::Io(e)) => {
                Err(Error::Connection(format!("failed to receive response: {}", e)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&mut self, frame: &[u8]) -> Result<(), Error> {
        write_frame(&mut self.stream, frame)
            .await
            .map_err(|e| Error::Connection(format!("failed to send request: {}", e)))
    }

    /// Mark the connection as dedicated to a subscription stream.
    pub(crate) fn start_streaming(&mut self) {
        self.state = ConnectionState::Streaming;
    }

    /// Close the connection.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Check if the connection accepts unary requests.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Configuration this connection was established with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.config.address)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_refused() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Connection::establish(ClientConfig::new(addr.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept but never answer
        let server = tokio::spawn(async move { listener.accept().await.unwrap() });

        let config =
            ClientConfig::new(addr.to_string()).with_timeout(Duration::from_millis(100));
        let mut conn = Connection::establish(config).await.unwrap();
        let _accepted = server.await.unwrap();

        let err = conn.send_request(&Request::ping(1)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_late_reply_is_never_paired_with_next_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // first reply arrives after the client gave up, later ones at once
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut first = true;
            while let Ok(Some(payload)) = read_frame(&mut stream).await {
                let request = Request::decode(&payload).unwrap();
                if first {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    first = false;
                }
                let reply = Response::pong(request.id).encode().unwrap();
                if write_frame(&mut stream, &reply).await.is_err() {
                    break;
                }
            }
        });

        let config =
            ClientConfig::new(addr.to_string()).with_timeout(Duration::from_millis(100));
        let mut conn = Connection::establish(config).await.unwrap();

        let err = conn.send_request(&Request::ping(1)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));

        tokio::time::sleep(Duration::from_millis(300)).await;
        for id in 2..5 {
            let err = conn.send_request(&Request::ping(id)).await.unwrap_err();
            assert!(matches!(err, Error::Connection(_)));
        }

        drop(conn);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_response_id() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await.unwrap();
            write_frame(&mut stream, &Response::pong(99).encode().unwrap())
                .await
                .unwrap();
            stream
        });

        let mut conn = Connection::establish(ClientConfig::new(addr.to_string()))
            .await
            .unwrap();
        let err = conn.send_request(&Request::ping(1)).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(conn.state(), ConnectionState::Closed);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_server_close_marks_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let _ = read_frame(&mut stream).await.unwrap();
        });

        let mut conn = Connection::establish(ClientConfig::new(addr.to_string()))
            .await
            .unwrap();
        let err = conn.send_request(&Request::ping(1)).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
