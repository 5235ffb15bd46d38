//! End-to-end tests: a real transport on a loopback port driven by the client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use kvstore_client::{Client, ClientConfig, Error as ClientError};
use kvstore_core::{ChangeType, KvService, WatchConfig};
use kvstore_server::{Error, RequestHandler, ServerConfig, Transport};

struct TestServer {
    addr: SocketAddr,
    service: KvService,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<Result<(), Error>>,
}

impl TestServer {
    async fn start(queue_capacity: usize) -> Self {
        let config = ServerConfig::new()
            .with_listen_address("127.0.0.1:0")
            .without_health()
            .with_queue_capacity(queue_capacity)
            .with_shutdown_timeout(Duration::from_secs(2));

        let service = KvService::new(WatchConfig::new().with_queue_capacity(queue_capacity));
        let handler = Arc::new(RequestHandler::new(service.clone()));
        let transport = Transport::bind(&config, handler).await.unwrap();
        let addr = transport.local_addr().unwrap();

        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(transport.run_until_shutdown(rx));

        Self {
            addr,
            service,
            shutdown,
            task,
        }
    }

    async fn client(&self) -> Client {
        Client::connect(ClientConfig::new(self.addr.to_string()))
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

/// Poll until `check` holds or a second passes.
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_set_and_get() {
    let server = TestServer::start(100).await;
    let client = server.client().await;

    client.ping().await.unwrap();

    let result = client.set("user:123", "Alice").await.unwrap();
    assert!(result.success);
    assert_eq!(result.message, "key stored successfully");

    assert_eq!(client.get("user:123").await.unwrap().as_deref(), Some("Alice"));
    assert_eq!(client.get("user:999").await.unwrap(), None);

    client.set("user:123", "Bob").await.unwrap();
    assert_eq!(client.get("user:123").await.unwrap().as_deref(), Some("Bob"));

    server.stop().await;
}

#[tokio::test]
async fn test_empty_key_rejected() {
    let server = TestServer::start(100).await;
    let client = server.client().await;

    assert!(client.get("").await.unwrap_err().is_invalid_argument());
    assert!(client.set("", "v").await.unwrap_err().is_invalid_argument());
    assert!(client.subscribe("").await.unwrap_err().is_invalid_argument());

    // the connection survives rejected requests
    client.ping().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_subscriber_receives_matching_events() {
    let server = TestServer::start(100).await;
    let writer = server.client().await;

    let mut users = writer.subscribe("user:").await.unwrap();

    writer.set("order:1", "x").await.unwrap();
    writer.set("user:123", "Alice").await.unwrap();
    writer.set("user:456", "Bob").await.unwrap();

    let first = users.next_event().await.unwrap().unwrap();
    assert_eq!(first.change_type, ChangeType::Set);
    assert_eq!(first.key, "user:123");
    assert_eq!(first.value, "Alice");
    assert!(first.timestamp_ms > 0);

    let second = users.next_event().await.unwrap().unwrap();
    assert_eq!(second.key, "user:456");
    assert!(second.timestamp_ms >= first.timestamp_ms);

    server.stop().await;
}

#[tokio::test]
async fn test_overlapping_prefixes_each_notified() {
    let server = TestServer::start(100).await;
    let client = server.client().await;

    let broad = client.subscribe("user").await.unwrap();
    let narrow = client.subscribe("user:1").await.unwrap();

    client.set("user:123", "Alice").await.unwrap();
    client.set("user:2", "Bob").await.unwrap();

    let broad: Vec<_> = broad
        .into_stream()
        .take(2)
        .map(|event| event.unwrap().key)
        .collect()
        .await;
    assert_eq!(broad, vec!["user:123", "user:2"]);

    let narrow: Vec<_> = narrow
        .into_stream()
        .take(1)
        .map(|event| event.unwrap().key)
        .collect()
        .await;
    assert_eq!(narrow, vec!["user:123"]);

    server.stop().await;
}

#[tokio::test]
async fn test_disconnect_unregisters_subscriber() {
    let server = TestServer::start(100).await;
    let client = server.client().await;

    let events = client.subscribe("user:").await.unwrap();
    assert_eq!(server.service.registry().subscriber_count("user:"), 1);

    drop(events);

    let registry = server.service.registry().clone();
    assert!(eventually(|| registry.subscriber_count("user:") == 0).await);
    assert_eq!(registry.prefix_count(), 0);

    // writes after the disconnect still succeed
    assert!(client.set("user:1", "x").await.unwrap().success);
    server.stop().await;
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_writes() {
    let server = TestServer::start(2).await;
    let client = server.client().await;

    // never read from this stream
    let _stalled = client.subscribe("k").await.unwrap();

    let writes = async {
        for i in 0..200 {
            client.set(&format!("k{}", i), "v").await.unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(5), writes)
        .await
        .expect("writes blocked by a slow subscriber");

    assert_eq!(client.get("k199").await.unwrap().as_deref(), Some("v"));
    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_streams() {
    let server = TestServer::start(100).await;
    let client = server.client().await;
    let mut events = client.subscribe("user:").await.unwrap();

    let service = server.service.clone();
    server.stop().await;

    assert!(service.registry().is_shutdown());
    let next = tokio::time::timeout(Duration::from_secs(2), events.next_event())
        .await
        .unwrap();
    assert!(matches!(next, Ok(None)));
    assert_eq!(service.registry().total_subscribers(), 0);
}

#[tokio::test]
async fn test_connect_to_stopped_server_fails() {
    let server = TestServer::start(100).await;
    let addr = server.addr;
    server.stop().await;

    let err = Client::connect(ClientConfig::new(addr.to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Connection(_)));
}
