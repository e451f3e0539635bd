//! Delivery counters
//!
//! Owned by one relay and shared by `Arc`. Counters are monotonically
//! increasing except the two gauges (`partitions_active`,
//! `connections_active`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Default)]
pub struct RelayStats {
    records_consumed: AtomicU64,
    delivered: AtomicU64,
    delivery_misses: AtomicU64,
    malformed: AtomicU64,
    fetch_errors: AtomicU64,
    cursor_resets: AtomicU64,
    partitions_active: AtomicU64,
    connections_active: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub records_consumed: u64,
    pub delivered: u64,
    pub delivery_misses: u64,
    pub malformed: u64,
    pub fetch_errors: u64,
    pub cursor_resets: u64,
    pub partitions_active: u64,
    pub connections_active: u64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_consumed(&self, count: u64) {
        self.records_consumed.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivery_miss(&self) {
        self.delivery_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cursor_reset(&self) {
        self.cursor_resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn partition_started(&self) {
        self.partitions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn partition_stopped(&self) {
        self.partitions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records_consumed: self.records_consumed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_misses: self.delivery_misses.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            cursor_resets: self.cursor_resets.load(Ordering::Relaxed),
            partitions_active: self.partitions_active.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
        }
    }
}

/// Log a snapshot every `interval` until shutdown
pub async fn run_stats_logger(
    stats: std::sync::Arc<RelayStats>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let s = stats.snapshot();
                info!(
                    target: "shardcast::stats",
                    records_consumed = s.records_consumed,
                    delivered = s.delivered,
                    delivery_misses = s.delivery_misses,
                    malformed = s.malformed,
                    fetch_errors = s.fetch_errors,
                    cursor_resets = s.cursor_resets,
                    partitions_active = s.partitions_active,
                    connections_active = s.connections_active,
                    "Relay statistics"
                );
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}
