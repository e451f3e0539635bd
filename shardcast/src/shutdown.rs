//! Graceful shutdown
//!
//! A single broadcast channel carries the shutdown request to every task:
//! 1. Stop accepting new connections
//! 2. Stop each partition consumer at its next fetch or wait
//! 3. Wait for consumers to finish the batch they are routing
//! 4. Exit

use crate::consumer::ConsumerExit;
use shardcast_stream::PartitionId;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Default drain timeout (25s to leave 5s buffer for K8s SIGKILL at 30s)
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(25);

/// Consumer tasks, each yielding the partition it served and why it stopped
pub type ConsumerTasks = JoinSet<(PartitionId, ConsumerExit)>;

#[cfg(unix)]
#[allow(clippy::expect_used)] // Signal handlers are startup-critical; abort is correct on failure
pub fn install_signal_handlers(
    shutdown_tx: broadcast::Sender<()>,
) -> impl std::future::Future<Output = ()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

    async move {
        tokio::select! {
            _ = sigterm.recv() => {
                info!(target: "shardcast::shutdown", "SIGTERM received, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                info!(target: "shardcast::shutdown", "SIGINT received, initiating graceful shutdown");
            }
        }

        let _ = shutdown_tx.send(());
    }
}

#[cfg(windows)]
pub async fn install_signal_handlers(shutdown_tx: broadcast::Sender<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(target: "shardcast::shutdown", error = %e, "Failed to listen for Ctrl+C");
        return;
    }

    info!(target: "shardcast::shutdown", "Ctrl+C received, initiating graceful shutdown");
    let _ = shutdown_tx.send(());
}

/// Wait for every consumer task to finish
///
/// Returns true on a clean drain. Tasks still running when `timeout`
/// elapses are aborted and false is returned.
pub async fn drain_consumers(tasks: &mut ConsumerTasks, timeout: Duration) -> bool {
    info!(
        target: "shardcast::shutdown",
        consumers = tasks.len(),
        timeout_secs = timeout.as_secs(),
        "Draining partition consumers"
    );

    let start = Instant::now();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(Ok((partition, exit)))) => {
                debug!(
                    target: "shardcast::shutdown",
                    partition = %partition,
                    exit = ?exit,
                    "Consumer drained"
                );
            },
            Ok(Some(Err(e))) => {
                warn!(target: "shardcast::shutdown", error = %e, "Consumer task ended abnormally");
            },
            Ok(None) => {
                info!(
                    target: "shardcast::shutdown",
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Drain complete"
                );
                return true;
            },
            Err(_) => {
                warn!(
                    target: "shardcast::shutdown",
                    remaining = tasks.len(),
                    "Drain timeout exceeded, aborting remaining consumers"
                );
                tasks.abort_all();
                return false;
            },
        }
    }
}
