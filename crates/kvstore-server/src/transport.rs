//! Server transport over framed TCP.
//!
//! Each accepted connection gets its own task. A connection serves unary
//! requests until it sends `Subscribe`; from then on it is dedicated to that
//! subscription's event stream until the client disconnects or the server
//! shuts down.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use kvstore_core::{ChangeEvent, EventSink};
use kvstore_proto::framing::{read_frame, write_frame, LENGTH_PREFIX_SIZE};
use kvstore_proto::{error_codes, Operation, Request, Response};

use crate::config::ServerConfig;
use crate::error::Error;
use crate::handler::RequestHandler;

/// Transport metrics for monitoring.
#[derive(Debug)]
pub struct TransportMetrics {
    /// Connections accepted.
    pub connections_total: AtomicU64,
    /// Unary requests handled.
    pub requests_total: AtomicU64,
    /// Unary requests answered with an error status.
    pub requests_failed: AtomicU64,
    /// Subscription streams opened.
    pub streams_total: AtomicU64,
    /// Subscription streams currently open.
    pub streams_active: AtomicU64,
    /// Events written to subscription streams.
    pub events_sent: AtomicU64,
    /// Bytes received.
    pub bytes_received: AtomicU64,
    /// Bytes sent.
    pub bytes_sent: AtomicU64,
    /// Server start time.
    pub started_at: Instant,
}

impl TransportMetrics {
    fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            streams_total: AtomicU64::new(0),
            streams_active: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    fn record_request(&self, received_bytes: usize, sent_bytes: usize, is_success: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if !is_success {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_received
            .fetch_add(received_bytes as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent_bytes as u64, Ordering::Relaxed);
    }

    fn record_event(&self, sent_bytes: usize) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent_bytes as u64, Ordering::Relaxed);
    }

    /// Get the uptime duration.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Get total requests count.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get failed requests count.
    pub fn failed_requests(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    /// Get the number of open subscription streams.
    pub fn active_streams(&self) -> u64 {
        self.streams_active.load(Ordering::Relaxed)
    }

    /// Get the number of events written to streams.
    pub fn total_events_sent(&self) -> u64 {
        self.events_sent.load(Ordering::Relaxed)
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Server transport that accepts connections and dispatches requests.
pub struct Transport {
    listener: TcpListener,
    handler: Arc<RequestHandler>,
    metrics: Arc<TransportMetrics>,
    max_message_size: usize,
    shutdown_timeout: Duration,
}

impl Transport {
    /// Bind the configured listen address.
    pub async fn bind(config: &ServerConfig, handler: Arc<RequestHandler>) -> Result<Self, Error> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| {
                Error::Transport(format!(
                    "failed to listen on {}: {}",
                    config.listen_address, e
                ))
            })?;

        info!(address = %config.listen_address, "listening on TCP");

        Ok(Self {
            listener,
            handler,
            metrics: Arc::new(TransportMetrics::new()),
            max_message_size: config.max_message_size,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    /// Address actually bound (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared transport metrics.
    pub fn metrics(&self) -> Arc<TransportMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Accept connections until `shutdown` fires, then close every stream
    /// and wait (up to the shutdown timeout) for connection tasks to finish.
    pub async fn run_until_shutdown(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), Error> {
        let connections_token = CancellationToken::new();
        let mut connections = JoinSet::new();

        info!("transport ready, accepting connections");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
                        debug!(%peer, "connection accepted");

                        let connection = Connection {
                            peer,
                            handler: Arc::clone(&self.handler),
                            metrics: Arc::clone(&self.metrics),
                            max_message_size: self.max_message_size,
                            shutdown: connections_token.clone(),
                        };
                        connections.spawn(connection.serve(stream));
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "connection task failed");
                    }
                }
            }
        }

        info!(
            total_requests = self.metrics.total_requests(),
            failed = self.metrics.failed_requests(),
            events_sent = self.metrics.total_events_sent(),
            active_streams = self.metrics.active_streams(),
            uptime_secs = self.metrics.uptime().as_secs(),
            "shutdown signal received, stopping transport"
        );

        drop(self.listener);
        self.handler.service().shutdown();
        connections_token.cancel();

        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                timeout_secs = self.shutdown_timeout.as_secs(),
                "connections did not close in time, aborting"
            );
            connections.abort_all();
        }

        info!("transport stopped");
        Ok(())
    }
}

/// Per-connection state.
struct Connection {
    peer: SocketAddr,
    handler: Arc<RequestHandler>,
    metrics: Arc<TransportMetrics>,
    max_message_size: usize,
    shutdown: CancellationToken,
}

impl Connection {
    async fn serve(self, stream: TcpStream) {
        let (mut reader, mut writer) = stream.into_split();

        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                frame = read_frame(&mut reader) => frame,
            };

            let payload = match frame {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    debug!(peer = %self.peer, "client closed connection");
                    break;
                }
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "failed to read request");
                    break;
                }
            };
            let received_bytes = LENGTH_PREFIX_SIZE + payload.len();

            let request = match self.decode(&payload) {
                Ok(request) => request,
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "rejecting malformed request");
                    let response = RequestHandler::error_response(0, &e);
                    match self.send(&mut writer, &response).await {
                        Ok(sent) => self.metrics.record_request(received_bytes, sent, false),
                        Err(_) => break,
                    }
                    continue;
                }
            };

            if let Operation::Subscribe { prefix } = &request.operation {
                self.metrics
                    .bytes_received
                    .fetch_add(received_bytes as u64, Ordering::Relaxed);
                self.stream_subscription(request.id, prefix, reader, writer)
                    .await;
                return;
            }

            let response = self.handler.handle(&request);
            let is_success = response.status.is_ok();
            match self.send(&mut writer, &response).await {
                Ok(sent) => self.metrics.record_request(received_bytes, sent, is_success),
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "failed to send response");
                    break;
                }
            }
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<Request, Error> {
        if payload.len() > self.max_message_size {
            return Err(Error::Protocol(kvstore_proto::Error::InvalidMessage(format!(
                "message too large: {} bytes (max: {})",
                payload.len(),
                self.max_message_size
            ))));
        }
        Ok(Request::decode(payload)?)
    }

    /// Encode and write one response, returning the bytes sent.
    async fn send(&self, writer: &mut OwnedWriteHalf, response: &Response) -> Result<usize, Error> {
        let frame = match response.encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "failed to encode response");
                Response::error(response.id, error_codes::INTERNAL, e.to_string()).encode()?
            }
        };
        write_frame(writer, &frame).await?;
        Ok(frame.len())
    }

    /// Serve one subscription until the client leaves, the server shuts
    /// down, or a write fails. The subscription is deregistered on every
    /// exit path.
    async fn stream_subscription(
        &self,
        request_id: u64,
        prefix: &str,
        reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
    ) {
        let subscription = match self.handler.subscribe(request_id, prefix) {
            Ok(subscription) => subscription,
            Err(response) => {
                let _ = self.send(&mut writer, &response).await;
                return;
            }
        };

        let subscription_id = subscription.id();
        if let Err(e) = self
            .send(&mut writer, &Response::subscribed(request_id, subscription_id))
            .await
        {
            // dropping the handle deregisters it
            warn!(peer = %self.peer, error = %e, "failed to confirm subscription");
            return;
        }

        self.metrics.streams_total.fetch_add(1, Ordering::Relaxed);
        self.metrics.streams_active.fetch_add(1, Ordering::Relaxed);

        let cancel = self.shutdown.child_token();
        let watcher = tokio::spawn(watch_disconnect(reader, cancel.clone()));

        let mut sink = FramedEventSink {
            writer,
            request_id,
            metrics: Arc::clone(&self.metrics),
        };
        let outcome = subscription.run(&mut sink, &cancel).await;

        cancel.cancel();
        let _ = watcher.await;
        self.metrics.streams_active.fetch_sub(1, Ordering::Relaxed);

        info!(
            peer = %self.peer,
            subscription_id,
            prefix,
            reason = outcome.as_str(),
            "subscription stream closed"
        );
    }
}

/// Cancel `cancel` once the client half-closes or resets the connection.
///
/// Bytes sent by the client after subscribing are ignored.
async fn watch_disconnect(mut reader: OwnedReadHalf, cancel: CancellationToken) {
    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read(&mut buf) => match read {
                Ok(0) | Err(_) => {
                    cancel.cancel();
                    return;
                }
                Ok(_) => continue,
            },
        }
    }
}

/// Writes events as framed `Event` responses on a subscription connection.
struct FramedEventSink {
    writer: OwnedWriteHalf,
    request_id: u64,
    metrics: Arc<TransportMetrics>,
}

impl EventSink for FramedEventSink {
    async fn deliver(&mut self, event: &ChangeEvent) -> Result<(), kvstore_core::Error> {
        let frame = Response::event(self.request_id, event.clone())
            .encode()
            .map_err(|e| kvstore_core::Error::Internal(e.to_string()))?;

        write_frame(&mut self.writer, &frame)
            .await
            .map_err(|e| kvstore_core::Error::DeliveryFailure(e.to_string()))?;

        self.metrics.record_event(frame.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvstore_core::KvService;
    use kvstore_proto::{ResponsePayload, Status};

    async fn bound_transport() -> (Transport, SocketAddr) {
        let config = ServerConfig::new()
            .with_listen_address("127.0.0.1:0")
            .with_shutdown_timeout(Duration::from_secs(2));
        let handler = Arc::new(RequestHandler::new(KvService::default()));
        let transport = Transport::bind(&config, handler).await.unwrap();
        let addr = transport.local_addr().unwrap();
        (transport, addr)
    }

    async fn roundtrip(stream: &mut TcpStream, frame: &[u8]) -> Response {
        write_frame(stream, frame).await.unwrap();
        let payload = read_frame(stream).await.unwrap().unwrap();
        Response::decode(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let config = ServerConfig::new().with_listen_address("not-an-address");
        let handler = Arc::new(RequestHandler::new(KvService::default()));
        assert!(matches!(
            Transport::bind(&config, handler).await,
            Err(Error::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_unary_requests_over_tcp() {
        let (transport, addr) = bound_transport().await;
        let metrics = transport.metrics();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn(transport.run_until_shutdown(shutdown_rx));

        let mut stream = TcpStream::connect(addr).await.unwrap();

        let set = Request::set(1, "user:1", "Alice").encode().unwrap();
        let response = roundtrip(&mut stream, &set).await;
        assert!(response.status.is_ok());

        let response = roundtrip(&mut stream, &Request::get(2, "user:1").encode().unwrap()).await;
        assert_eq!(response.id, 2);
        assert_eq!(
            response.payload,
            ResponsePayload::Value {
                value: "Alice".to_string(),
                found: true
            }
        );

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(metrics.total_requests(), 2);
    }

    #[tokio::test]
    async fn test_malformed_request_keeps_connection() {
        let (transport, addr) = bound_transport().await;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn(transport.run_until_shutdown(shutdown_rx));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let garbage = kvstore_proto::framing::encode_frame(b"invalid data").unwrap();

        let response = roundtrip(&mut stream, &garbage).await;
        match response.status {
            Status::Error { code, .. } => assert_eq!(code, error_codes::PROTOCOL),
            Status::Ok => panic!("expected protocol error"),
        }

        let ping = Request::ping(7).encode().unwrap();
        let response = roundtrip(&mut stream, &ping).await;
        assert_eq!(response.payload, ResponsePayload::Pong);

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_subscription_stream_over_tcp() {
        let (transport, addr) = bound_transport().await;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn(transport.run_until_shutdown(shutdown_rx));

        let mut subscriber = TcpStream::connect(addr).await.unwrap();
        let subscribe = Request::subscribe(10, "user:").encode().unwrap();
        let ack = roundtrip(&mut subscriber, &subscribe).await;
        assert!(matches!(ack.payload, ResponsePayload::Subscribed { .. }));

        let mut writer = TcpStream::connect(addr).await.unwrap();
        roundtrip(&mut writer, &Request::set(1, "order:1", "x").encode().unwrap()).await;
        roundtrip(&mut writer, &Request::set(2, "user:123", "Alice").encode().unwrap()).await;

        let payload = read_frame(&mut subscriber).await.unwrap().unwrap();
        let event = Response::decode(&payload).unwrap();
        assert_eq!(event.id, 10);
        match event.payload {
            ResponsePayload::Event(event) => {
                assert_eq!(event.key, "user:123");
                assert_eq!(event.value, "Alice");
            }
            other => panic!("expected event, got {:?}", other),
        }

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();

        // server closed the stream
        assert!(read_frame(&mut subscriber).await.unwrap().is_none());
    }

    #[test]
    fn test_error_response_frame_decodes() {
        let response = Response::error(0, error_codes::PROTOCOL, "bad");
        let frame = response.encode().unwrap();
        let decoded = Response::decode(&frame[LENGTH_PREFIX_SIZE..]).unwrap();
        assert_eq!(decoded, response);
    }
}
