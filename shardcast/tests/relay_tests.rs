//! End-to-end tests: a relay over an in-memory stream, driven by real
//! WebSocket clients on a loopback listener.

#![allow(clippy::unwrap_used)]

use futures::{SinkExt, StreamExt};
use shardcast::{
    Config, ConnectionRegistry, Inbound, InboundHandler, Relay, RelayStats, shutdown,
};
use shardcast_stream::{MemoryStream, PartitionId, StartMode, StreamSource};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct TestRelay {
    stream: Arc<MemoryStream>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<RelayStats>,
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<shardcast::Result<()>>,
}

impl TestRelay {
    async fn start(partitions: usize) -> Self {
        Self::start_with(partitions, None).await
    }

    async fn start_with(partitions: usize, inbound: Option<Arc<dyn InboundHandler>>) -> Self {
        let stream = Arc::new(MemoryStream::with_partitions("responses", partitions));
        let source: Arc<dyn StreamSource> = Arc::clone(&stream) as Arc<dyn StreamSource>;

        let mut config = Config::default();
        config.stream.name = "responses".into();
        config.stream.start_position = StartMode::TrimHorizon;
        config.consumer.retry_interval_ms = 10;
        config.consumer.pacing_interval_ms = 5;
        config.stats_interval_secs = 0;

        let mut relay = Relay::new(config, source).with_drain_timeout(WAIT);
        if let Some(inbound) = inbound {
            relay = relay.with_inbound(inbound);
        }
        let registry = Arc::clone(relay.registry());
        let stats = Arc::clone(relay.stats());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = tokio::spawn(relay.run(listener, shutdown_tx.clone()));

        Self {
            stream,
            registry,
            stats,
            addr,
            shutdown_tx,
            handle,
        }
    }

    fn partition(&self, index: usize) -> PartitionId {
        PartitionId::new(format!("shardId-{:012}", index))
    }

    fn append(&self, index: usize, record: &str) {
        self.stream
            .append(&self.partition(index), record.to_string())
            .unwrap();
    }

    /// Connect and wait until the relay has registered the connection
    async fn connect(&self, client_id: &str) -> Client {
        let previous = self.registry.lookup(client_id).map(|c| c.id());
        let url = format!("ws://{}/?clientId={}", self.addr, client_id);
        let (ws, _) = connect_async(url).await.unwrap();

        timeout(WAIT, async {
            loop {
                let current = self.registry.lookup(client_id).map(|c| c.id());
                if current.is_some() && current != previous {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        ws
    }

    async fn stop(self) {
        self.shutdown_tx.send(()).unwrap();
        timeout(WAIT * 2, self.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

/// Next data or close frame, skipping keepalives
async fn next_frame(ws: &mut Client) -> Option<Message> {
    loop {
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(msg)) => return Some(msg),
            Some(Err(_)) | None => return None,
        }
    }
}

async fn next_text(ws: &mut Client) -> String {
    match next_frame(ws).await {
        Some(Message::Text(text)) => text.as_str().to_string(),
        other => panic!("expected text frame, got {:?}", other),
    }
}

async fn assert_no_text(ws: &mut Client) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(Duration::from_millis(200), ws.next()).await
    {
        panic!("unexpected text frame {}", text.as_str());
    }
}

#[tokio::test]
async fn test_record_is_delivered_to_its_client() {
    let relay = TestRelay::start(1).await;
    let mut abc = relay.connect("abc").await;

    relay.append(0, r#"{"clientId":"abc","message":{"text":"hello","isFinal":true}}"#);

    assert_eq!(next_text(&mut abc).await, r#"{"text":"hello","isFinal":true}"#);
    assert_no_text(&mut abc).await;
    assert_eq!(relay.stats.snapshot().delivered, 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_unconnected_target_is_dropped_and_consumption_continues() {
    let relay = TestRelay::start(1).await;
    let mut abc = relay.connect("abc").await;

    relay.append(0, r#"{"clientId":"ghost","message":{"text":"lost"}}"#);
    relay.append(0, r#"{"clientId":"abc","message":{"text":"after"}}"#);

    assert_eq!(next_text(&mut abc).await, r#"{"text":"after"}"#);
    assert_no_text(&mut abc).await;
    assert_eq!(relay.stats.snapshot().delivery_misses, 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_missing_client_id_is_closed_with_policy_violation() {
    let relay = TestRelay::start(1).await;

    for url in [
        format!("ws://{}/", relay.addr),
        format!("ws://{}/?clientId=", relay.addr),
    ] {
        let (mut ws, _) = connect_async(url).await.unwrap();
        match next_frame(&mut ws).await {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), 1008);
                assert_eq!(frame.reason.as_str(), "clientId required");
            },
            other => panic!("expected close frame, got {:?}", other),
        }
    }
    assert!(relay.registry.is_empty());

    relay.stop().await;
}

#[tokio::test]
async fn test_reconnect_replaces_previous_connection() {
    let relay = TestRelay::start(1).await;
    let mut old = relay.connect("abc").await;
    let mut new = relay.connect("abc").await;

    match next_frame(&mut old).await {
        Some(Message::Close(Some(frame))) => {
            assert_eq!(u16::from(frame.code), 1000);
            assert_eq!(frame.reason.as_str(), "superseded by a newer connection");
        },
        other => panic!("expected close frame, got {:?}", other),
    }

    relay.append(0, r#"{"clientId":"abc","message":"for the newest"}"#);
    assert_eq!(next_text(&mut new).await, r#""for the newest""#);

    // The superseded session ending must not deregister its replacement
    drop(old);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(relay.registry.lookup("abc").is_some());
    assert_eq!(relay.registry.len(), 1);

    relay.stop().await;
}

#[tokio::test]
async fn test_disconnect_deregisters_client() {
    let relay = TestRelay::start(1).await;
    let mut ws = relay.connect("abc").await;

    ws.close(None).await.unwrap();
    timeout(WAIT, async {
        while relay.registry.lookup("abc").is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    relay.append(0, r#"{"clientId":"abc","message":{}}"#);
    timeout(WAIT, async {
        while relay.stats.snapshot().delivery_misses == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(relay.stats.snapshot().connections_active, 0);

    relay.stop().await;
}

#[tokio::test]
async fn test_per_partition_order_across_clients() {
    let relay = TestRelay::start(2).await;
    let mut a = relay.connect("a").await;
    let mut b = relay.connect("b").await;

    for n in 0..20 {
        relay.append(0, &format!(r#"{{"clientId":"a","message":{}}}"#, n));
        relay.append(1, &format!(r#"{{"clientId":"b","message":{}}}"#, n));
    }

    for n in 0..20 {
        assert_eq!(next_text(&mut a).await, n.to_string());
    }
    for n in 0..20 {
        assert_eq!(next_text(&mut b).await, n.to_string());
    }

    relay.stop().await;
}

#[tokio::test]
async fn test_malformed_records_do_not_stop_delivery() {
    let relay = TestRelay::start(1).await;
    let mut abc = relay.connect("abc").await;

    relay.append(0, "not json at all");
    relay.append(0, r#"{"message":{"text":"no client"}}"#);
    relay.append(0, r#"{"clientId":"abc","message":{"text":"ok"}}"#);

    assert_eq!(next_text(&mut abc).await, r#"{"text":"ok"}"#);
    assert_eq!(relay.stats.snapshot().malformed, 2);

    relay.stop().await;
}

#[derive(Default)]
struct Collecting {
    seen: Mutex<Vec<(String, String)>>,
}

impl InboundHandler for Collecting {
    fn on_message(&self, client_id: &str, message: Inbound<'_>) {
        if let Inbound::Text(text) = message {
            self.seen
                .lock()
                .unwrap()
                .push((client_id.to_string(), text.to_string()));
        }
    }
}

#[tokio::test]
async fn test_inbound_messages_reach_handler() {
    let collecting = Arc::new(Collecting::default());
    let relay =
        TestRelay::start_with(1, Some(Arc::clone(&collecting) as Arc<dyn InboundHandler>)).await;
    let mut ws = relay.connect("abc").await;

    ws.send(Message::Text("ping from client".into())).await.unwrap();

    timeout(WAIT, async {
        while collecting.seen.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        collecting.seen.lock().unwrap()[0],
        ("abc".to_string(), "ping from client".to_string())
    );

    relay.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_live_sessions_going_away() {
    let relay = TestRelay::start(1).await;
    let mut ws = relay.connect("abc").await;

    relay.shutdown_tx.send(()).unwrap();

    match next_frame(&mut ws).await {
        Some(Message::Close(Some(frame))) => {
            assert_eq!(u16::from(frame.code), 1001);
            assert_eq!(frame.reason.as_str(), "server shutting down");
        },
        other => panic!("expected close frame, got {:?}", other),
    }

    timeout(WAIT * 2, relay.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_completes_within_drain_timeout() {
    let relay = TestRelay::start(4).await;
    let _ws = relay.connect("abc").await;

    timeout(WAIT, async {
        while relay.stats.snapshot().partitions_active < 4 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let stats = Arc::clone(&relay.stats);
    relay.stop().await;
    assert_eq!(stats.snapshot().partitions_active, 0);
    assert!(shutdown::DRAIN_TIMEOUT > WAIT);
}
