use crate::record::{MalformedRecord, RoutedMessage};
use crate::registry::ConnectionRegistry;
use crate::stats::RelayStats;
use std::sync::Arc;
use tracing::trace;

/// Outcome of routing one well-formed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the target's connection
    Delivered,
    /// Target not connected; the record is dropped
    NotConnected,
}

/// Resolves each record's target connection and hands it the payload
///
/// Routing never waits on a client: delivery only enqueues on the
/// connection's outbound queue.
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<RelayStats>,
}

impl Router {
    pub fn new(registry: Arc<ConnectionRegistry>, stats: Arc<RelayStats>) -> Self {
        Self { registry, stats }
    }

    pub fn route(&self, raw: &[u8]) -> Result<Delivery, MalformedRecord> {
        let routed = match RoutedMessage::parse(raw) {
            Ok(routed) => routed,
            Err(e) => {
                self.stats.record_malformed();
                return Err(e);
            },
        };

        let delivered = match self.registry.lookup(&routed.client_id) {
            Some(conn) if conn.is_open() => conn.send_text(routed.payload()),
            _ => false,
        };

        if delivered {
            self.stats.record_delivered();
            Ok(Delivery::Delivered)
        } else {
            self.stats.record_delivery_miss();
            trace!(
                target: "shardcast::router",
                client_id = %routed.client_id,
                "Target not connected, dropping record"
            );
            Ok(Delivery::NotConnected)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionHandle, Outbound};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn router() -> (Router, Arc<ConnectionRegistry>, Arc<RelayStats>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let stats = Arc::new(RelayStats::new());
        (
            Router::new(Arc::clone(&registry), Arc::clone(&stats)),
            registry,
            stats,
        )
    }

    fn connect(registry: &ConnectionRegistry, client_id: &str) -> UnboundedReceiver<Outbound> {
        let (conn, rx) = ConnectionHandle::channel(registry.next_connection_id());
        registry.register(client_id, conn);
        rx
    }

    fn record(client_id: &str, message: &str) -> Vec<u8> {
        format!(r#"{{"clientId":"{}","message":{}}}"#, client_id, message).into_bytes()
    }

    #[test]
    fn test_delivers_payload_to_target() {
        let (router, registry, stats) = router();
        let mut rx = connect(&registry, "abc");

        let outcome = router
            .route(&record("abc", r#"{"text":"hello","isFinal":true}"#))
            .unwrap();

        assert_eq!(outcome, Delivery::Delivered);
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Text(r#"{"text":"hello","isFinal":true}"#.into())
        );
        assert!(rx.try_recv().is_err(), "exactly one write per delivery");
        assert_eq!(stats.snapshot().delivered, 1);
    }

    #[test]
    fn test_delivers_payload_reserialized() {
        let (router, registry, _stats) = router();
        let mut rx = connect(&registry, "abc");

        let raw = br#"{"clientId":"abc","message": { "text" : "hello", "isFinal" : true }}"#;
        assert_eq!(router.route(raw).unwrap(), Delivery::Delivered);
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Text(r#"{"text":"hello","isFinal":true}"#.into())
        );
    }

    #[test]
    fn test_unknown_client_is_dropped() {
        let (router, registry, stats) = router();
        let mut rx = connect(&registry, "abc");

        let outcome = router.route(&record("ghost", "{}")).unwrap();

        assert_eq!(outcome, Delivery::NotConnected);
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.snapshot().delivery_misses, 1);
    }

    #[test]
    fn test_deregistered_client_is_dropped() {
        let (router, registry, _stats) = router();
        let mut rx = connect(&registry, "abc");
        registry.remove("abc");

        let outcome = router.route(&record("abc", "{}")).unwrap();

        assert_eq!(outcome, Delivery::NotConnected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_connection_is_dropped() {
        let (router, registry, _stats) = router();
        let rx = connect(&registry, "abc");
        drop(rx);

        let outcome = router.route(&record("abc", "{}")).unwrap();
        assert_eq!(outcome, Delivery::NotConnected);
    }

    #[test]
    fn test_reregistered_client_gets_only_newest() {
        let (router, registry, _stats) = router();
        let mut old_rx = connect(&registry, "abc");
        let mut new_rx = connect(&registry, "abc");

        router.route(&record("abc", "1")).unwrap();

        assert_eq!(new_rx.try_recv().unwrap(), Outbound::Text("1".into()));
        assert!(old_rx.try_recv().is_err());
    }

    #[test]
    fn test_malformed_record_is_counted() {
        let (router, _registry, stats) = router();

        assert!(router.route(b"{not json").is_err());
        assert!(router.route(br#"{"message":{}}"#).is_err());
        assert_eq!(stats.snapshot().malformed, 2);
        assert_eq!(stats.snapshot().delivery_misses, 0);
    }
}
