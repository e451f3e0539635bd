//! Connection registry
//!
//! Maps a client identifier to the handle of its live connection. The
//! acceptor writes, every partition consumer reads. Each operation takes the
//! lock for a single map access and never across I/O: delivery goes through
//! the handle's outbound queue after the lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

/// A frame queued for a connection's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Sending half of one client connection
///
/// Cloning is cheap; all clones feed the same writer task. The connection
/// counts as open for as long as that task holds the receiving half.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(id: u64, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, tx }
    }

    /// Create a handle together with the queue its writer drains
    pub fn channel(id: u64) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(id, tx), rx)
    }

    /// Process-unique id distinguishing reconnects under the same client id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a text frame. Returns false if the connection has gone away.
    pub fn send_text(&self, text: String) -> bool {
        self.tx.send(Outbound::Text(text)).is_ok()
    }

    /// Queue a close frame; the writer stops after sending it
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .is_ok()
    }
}

/// Live mapping from client identifier to connection
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id for a new connection handle
    pub fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `handle` under `client_id`, replacing any existing entry
    ///
    /// Returns the displaced handle. It is left open; closing it is up to
    /// the caller.
    pub fn register(
        &self,
        client_id: impl Into<String>,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let client_id = client_id.into();
        let connection_id = handle.id();

        let previous = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(client_id.clone(), handle);

        debug!(
            target: "shardcast::registry",
            client_id = %client_id,
            connection_id,
            replaced = previous.as_ref().map(ConnectionHandle::id),
            "Connection registered"
        );

        previous
    }

    pub fn lookup(&self, client_id: &str) -> Option<ConnectionHandle> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
            .cloned()
    }

    /// Remove whatever is registered under `client_id`
    ///
    /// Idempotent: returns false if nothing was registered.
    pub fn remove(&self, client_id: &str) -> bool {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(client_id)
            .is_some()
    }

    /// Remove the entry for `client_id` only if it still belongs to
    /// `connection_id`
    ///
    /// A connection that was superseded by a reconnect must not deregister
    /// its replacement when it closes.
    pub fn remove_connection(&self, client_id: &str, connection_id: u64) -> bool {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match connections.get(client_id) {
            Some(current) if current.id() == connection_id => {
                connections.remove(client_id);
                true
            },
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
