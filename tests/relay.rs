//! End-to-end tests over real sockets
//!
//! Each test binds both endpoints on ephemeral ports and drives them with
//! tokio-tungstenite clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use stream_relay::registry::RelayEncoding;
use stream_relay::{Authority, RegistryConfig, RelayServer, ServerConfig};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const VALID_TOKEN: &str = "valid-token";
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct TokenList(Vec<&'static str>);

impl Authority for TokenList {
    async fn validate(&self, token: &str) -> bool {
        self.0.iter().any(|accepted| *accepted == token)
    }
}

struct Harness {
    server: Arc<RelayServer<TokenList>>,
    producer_addr: SocketAddr,
    subscriber_addr: SocketAddr,
    serving: JoinHandle<stream_relay::Result<()>>,
}

impl Harness {
    async fn start() -> Self {
        Self::with_registry_config(RegistryConfig::default()).await
    }

    async fn with_registry_config(registry_config: RegistryConfig) -> Self {
        let producer = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let subscriber = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let producer_addr = producer.local_addr().unwrap();
        let subscriber_addr = subscriber.local_addr().unwrap();

        let config = ServerConfig::default().shutdown_notice_delay(Duration::from_millis(50));
        let server = Arc::new(RelayServer::with_registry_config(
            config,
            TokenList(vec![VALID_TOKEN]),
            registry_config,
        ));
        let serving = tokio::spawn(Arc::clone(&server).serve(producer, subscriber));

        Self {
            server,
            producer_addr,
            subscriber_addr,
            serving,
        }
    }

    /// Connect a producer and wait for the confirmation
    async fn producer(&self) -> Client {
        let (mut ws, _) = connect_async(format!("ws://{}/", self.producer_addr))
            .await
            .unwrap();
        ws.send(Message::text("ESP32")).await.unwrap();
        assert_eq!(next_text(&mut ws).await, "Connected to Server");
        ws
    }

    /// Connect a subscriber and consume its initial status
    async fn subscriber(&self) -> (Client, Value) {
        let mut ws = self.connect_subscriber(Some(VALID_TOKEN)).await;
        let status = next_json(&mut ws).await;
        assert_eq!(status["type"], "status");
        (ws, status)
    }

    async fn connect_subscriber(&self, token: Option<&str>) -> Client {
        let url = match token {
            Some(token) => format!("ws://{}/?token={}", self.subscriber_addr, token),
            None => format!("ws://{}/", self.subscriber_addr),
        };
        let (ws, _) = connect_async(url).await.unwrap();
        ws
    }
}

/// Next data or close frame, skipping protocol pings
async fn next_message(ws: &mut Client) -> Message {
    loop {
        let message = tokio::time::timeout(READ_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read failed");

        match message {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_text(ws: &mut Client) -> String {
    match next_message(ws).await {
        Message::Text(text) => text.as_str().to_owned(),
        other => panic!("expected text, got {:?}", other),
    }
}

async fn next_json(ws: &mut Client) -> Value {
    serde_json::from_str(&next_text(ws).await).unwrap()
}

async fn next_close(ws: &mut Client) -> CloseFrame {
    loop {
        match next_message(ws).await {
            Message::Close(Some(frame)) => return frame,
            Message::Close(None) => panic!("close without a frame"),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_frames_reach_every_subscriber() {
    let harness = Harness::start().await;

    let mut subscribers = Vec::new();
    for _ in 0..3 {
        let (ws, status) = harness.subscriber().await;
        assert_eq!(status["esp32Connected"], false);
        assert_eq!(status["message"], "Waiting for ESP32");
        subscribers.push(ws);
    }

    let mut producer = harness.producer().await;
    for ws in subscribers.iter_mut() {
        let event = next_json(ws).await;
        assert_eq!(event["type"], "streaming-status");
        assert_eq!(event["streaming"], true);
    }

    let frames: Vec<Bytes> = vec![
        Bytes::from_static(&[0, 1, 2, 3]),
        Bytes::from((0..=255u8).cycle().take(4096).collect::<Vec<_>>()),
        Bytes::from_static(&[255]),
    ];
    for frame in &frames {
        producer.send(Message::Binary(frame.clone())).await.unwrap();
    }

    for ws in subscribers.iter_mut() {
        for expected in &frames {
            match next_message(ws).await {
                Message::Binary(data) => assert_eq!(&data, expected),
                other => panic!("expected binary, got {:?}", other),
            }
        }
    }

    let stats = harness.server.registry().stats().snapshot();
    assert_eq!(stats.frames_relayed, 3);
    assert_eq!(stats.deliveries, 9);
}

#[tokio::test]
async fn test_newer_producer_replaces_older() {
    let harness = Harness::start().await;
    let (mut sub, _) = harness.subscriber().await;

    let mut first = harness.producer().await;
    assert_eq!(next_json(&mut sub).await["streaming"], true);

    let mut second = harness.producer().await;

    let frame = next_close(&mut first).await;
    assert_eq!(u16::from(frame.code), 4000);
    assert_eq!(frame.reason.as_str(), "Replaced by newer producer connection");

    // Stop for the displaced producer, start for the new one
    assert_eq!(next_json(&mut sub).await["streaming"], false);
    assert_eq!(next_json(&mut sub).await["streaming"], true);

    second
        .send(Message::Binary(Bytes::from_static(b"from-second")))
        .await
        .unwrap();
    assert_eq!(
        next_message(&mut sub).await,
        Message::Binary(Bytes::from_static(b"from-second"))
    );

    let snapshot = harness.server.registry().status_snapshot().await;
    assert!(snapshot.producer_connected);
}

#[tokio::test]
async fn test_base64_envelope_mode() {
    let config = RegistryConfig::default().relay_encoding(RelayEncoding::Base64Envelope);
    let harness = Harness::with_registry_config(config).await;
    let (mut sub, _) = harness.subscriber().await;

    let mut producer = harness.producer().await;
    next_json(&mut sub).await;

    producer
        .send(Message::Binary(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef])))
        .await
        .unwrap();

    let envelope = next_json(&mut sub).await;
    assert_eq!(envelope["type"], "audio");
    assert_eq!(envelope["data"], "3q2+7w==");
    assert_eq!(envelope["size"], 4);
    assert!(envelope["timestamp"].is_i64());
}

#[tokio::test]
async fn test_missing_or_invalid_token_is_rejected() {
    let harness = Harness::start().await;

    let mut anonymous = harness.connect_subscriber(None).await;
    let frame = next_close(&mut anonymous).await;
    assert_eq!(u16::from(frame.code), 1008);
    assert_eq!(frame.reason.as_str(), "Authentication token required");

    for _ in 0..2 {
        let mut forged = harness.connect_subscriber(Some("forged")).await;
        let frame = next_close(&mut forged).await;
        assert_eq!(u16::from(frame.code), 1008);
        assert_eq!(frame.reason.as_str(), "Invalid authentication token");
    }

    assert_eq!(harness.server.registry().subscriber_count().await, 0);
}

#[tokio::test]
async fn test_unknown_message_type_gets_error_reply() {
    let harness = Harness::start().await;
    let (mut sub, _) = harness.subscriber().await;
    let before = harness.server.registry().status_snapshot().await;

    sub.send(Message::text(json!({"type": "unknown-xyz"}).to_string()))
        .await
        .unwrap();

    let reply = next_json(&mut sub).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "Unknown message type: unknown-xyz");
    assert_eq!(harness.server.registry().status_snapshot().await, before);

    // Still connected afterwards
    sub.send(Message::text(r#"{"type":"ping","id":1}"#))
        .await
        .unwrap();
    let pong = next_json(&mut sub).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["id"], 1);
}

#[tokio::test]
async fn test_start_listening_reaches_producer() {
    let harness = Harness::start().await;
    let (mut sub, _) = harness.subscriber().await;

    sub.send(Message::text(r#"{"type":"start-listening"}"#))
        .await
        .unwrap();
    let reply = next_json(&mut sub).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["message"], "ESP32 not connected");
    assert_eq!(next_json(&mut sub).await["message"], "ESP32 not available");

    let mut producer = harness.producer().await;
    assert_eq!(next_json(&mut sub).await["type"], "streaming-status");

    sub.send(Message::text(r#"{"type":"start-listening"}"#))
        .await
        .unwrap();

    assert_eq!(next_text(&mut producer).await, "Listen");
    let sent = next_json(&mut sub).await;
    assert_eq!(sent["type"], "command-sent");
    assert_eq!(sent["command"], "Listen");

    producer.send(Message::text("STATUS: recording")).await.unwrap();
    let status = next_json(&mut sub).await;
    assert_eq!(status["type"], "esp32-status");
    assert_eq!(status["status"], "STATUS: recording");
}

#[tokio::test]
async fn test_producer_disconnect_is_announced() {
    let harness = Harness::start().await;
    let (mut sub, _) = harness.subscriber().await;

    let mut producer = harness.producer().await;
    assert_eq!(next_json(&mut sub).await["streaming"], true);

    assert_ok!(producer.close(None).await);
    drop(producer);

    let event = next_json(&mut sub).await;
    assert_eq!(event["type"], "streaming-status");
    assert_eq!(event["streaming"], false);
    assert_eq!(event["esp32Connected"], false);
}

#[tokio::test]
async fn test_shutdown_notice_precedes_close() {
    let harness = Harness::start().await;

    let mut subscribers = Vec::new();
    for _ in 0..3 {
        subscribers.push(harness.subscriber().await.0);
    }
    let mut producer = harness.producer().await;
    for ws in subscribers.iter_mut() {
        next_json(ws).await;
    }

    let report = harness.server.shutdown().await.unwrap();
    assert_eq!(report.subscribers_closed, 3);
    assert!(harness.server.shutdown().await.is_none());

    for ws in subscribers.iter_mut() {
        let notice = next_json(ws).await;
        assert_eq!(notice["type"], "server-shutdown");
        assert_eq!(notice["message"], "Server is shutting down");

        let frame = next_close(ws).await;
        assert_eq!(u16::from(frame.code), 1001);
        assert_eq!(frame.reason.as_str(), "Server shutdown");
    }

    assert_eq!(next_text(&mut producer).await, "Server shutting down");
    assert_eq!(u16::from(next_close(&mut producer).await.code), 1001);

    let served = tokio::time::timeout(READ_TIMEOUT, harness.serving)
        .await
        .unwrap()
        .unwrap();
    assert_ok!(served);

    // Listeners are gone
    assert!(connect_async(format!("ws://{}/", harness.subscriber_addr))
        .await
        .is_err());
}
