//! Connection acceptor
//!
//! Serves the WebSocket endpoint. Every accepted connection gets two tasks:
//! the session task reads inbound frames, a writer task drains the
//! connection's outbound queue to the socket. The router only ever touches
//! the queue, so a stalled client holds up nobody but itself.

use crate::registry::{ConnectionHandle, ConnectionRegistry, Outbound};
use crate::stats::RelayStats;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::Uri;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Close reason sent when a connection arrives without a client id
pub const CLIENT_ID_REQUIRED: &str = "clientId required";

/// Close reason sent to a connection displaced by a reconnect
pub const SUPERSEDED: &str = "superseded by a newer connection";

/// Close reason sent to every live connection when the relay stops
pub const SHUTTING_DOWN: &str = "server shutting down";

/// A frame received from a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

/// Receives whatever clients send upstream
pub trait InboundHandler: Send + Sync {
    fn on_message(&self, client_id: &str, message: Inbound<'_>);
}

/// Default handler: clients have nothing to say to the relay
#[derive(Debug, Default)]
pub struct LoggingInbound;

impl InboundHandler for LoggingInbound {
    fn on_message(&self, client_id: &str, message: Inbound<'_>) {
        let len = match message {
            Inbound::Text(text) => text.len(),
            Inbound::Binary(data) => data.len(),
        };
        debug!(
            target: "shardcast::acceptor",
            client_id = %client_id,
            len,
            "Inbound message ignored"
        );
    }
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(rename = "clientId")]
    client_id: Option<String>,
}

#[derive(Clone)]
pub struct Acceptor {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<RelayStats>,
    inbound: Arc<dyn InboundHandler>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl Acceptor {
    pub fn new(registry: Arc<ConnectionRegistry>, stats: Arc<RelayStats>) -> Self {
        Self {
            registry,
            stats,
            inbound: Arc::new(LoggingInbound),
            shutdown_tx: None,
        }
    }

    pub fn with_inbound(mut self, inbound: Arc<dyn InboundHandler>) -> Self {
        self.inbound = inbound;
        self
    }

    /// Close live sessions with 1001 once `shutdown_tx` fires
    pub fn with_shutdown(mut self, shutdown_tx: broadcast::Sender<()>) -> Self {
        self.shutdown_tx = Some(shutdown_tx);
        self
    }

    /// HTTP service upgrading requests on any path
    pub fn into_router(self) -> axum::Router {
        axum::Router::new().fallback(upgrade).with_state(self)
    }

    async fn serve(self, client_id: String, socket: WebSocket) {
        let (handle, mut outbound_rx) =
            ConnectionHandle::channel(self.registry.next_connection_id());
        let connection_id = handle.id();
        let own = handle.clone();
        let mut shutdown_rx = self.shutdown_tx.as_ref().map(broadcast::Sender::subscribe);
        let mut closing = false;

        if let Some(previous) = self.registry.register(client_id.clone(), handle) {
            debug!(
                target: "shardcast::acceptor",
                client_id = %client_id,
                previous = previous.id(),
                "Closing superseded connection"
            );
            previous.close(close_code::NORMAL, SUPERSEDED);
        }

        self.stats.connection_opened();
        info!(
            target: "shardcast::acceptor",
            client_id = %client_id,
            connection_id,
            "Client connected"
        );

        let (mut sink, mut stream) = socket.split();

        let mut writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                match frame {
                    Outbound::Text(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    },
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code,
                            reason: reason.into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        break;
                    },
                }
            }
        });

        loop {
            tokio::select! {
                // Writer gone: socket failed or the connection was superseded
                _ = &mut writer => break,
                // The writer sends the close frame and then ends the session
                _ = shutdown_requested(&mut shutdown_rx), if !closing => {
                    closing = true;
                    own.close(close_code::AWAY, SHUTTING_DOWN);
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.inbound.on_message(&client_id, Inbound::Text(text.as_str()));
                    },
                    Some(Ok(Message::Binary(data))) => {
                        self.inbound.on_message(&client_id, Inbound::Binary(&data));
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {},
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(
                            target: "shardcast::acceptor",
                            client_id = %client_id,
                            error = %e,
                            "Connection read failed"
                        );
                        break;
                    },
                },
            }
        }

        self.registry.remove_connection(&client_id, connection_id);
        writer.abort();
        self.stats.connection_closed();

        info!(
            target: "shardcast::acceptor",
            client_id = %client_id,
            connection_id,
            "Client disconnected"
        );
    }
}

async fn upgrade(ws: WebSocketUpgrade, uri: Uri, State(acceptor): State<Acceptor>) -> Response {
    let client_id = client_id_from(&uri);

    ws.on_upgrade(move |socket| async move {
        match client_id {
            Some(client_id) => acceptor.serve(client_id, socket).await,
            None => reject(socket).await,
        }
    })
}

async fn shutdown_requested(shutdown_rx: &mut Option<broadcast::Receiver<()>>) {
    match shutdown_rx {
        Some(rx) => {
            let _ = rx.recv().await;
        },
        None => std::future::pending().await,
    }
}

/// The `clientId` query parameter, if present and non-empty
fn client_id_from(uri: &Uri) -> Option<String> {
    Query::<ConnectParams>::try_from_uri(uri)
        .ok()
        .and_then(|Query(params)| params.client_id)
        .filter(|id| !id.is_empty())
}

async fn reject(mut socket: WebSocket) {
    warn!(
        target: "shardcast::acceptor",
        "Connection without clientId rejected"
    );

    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: CLIENT_ID_REQUIRED.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
