//! Partition consumer
//!
//! One consumer owns one partition and polls it for the life of the relay:
//!
//! 1. Fetch up to `fetch_limit` records at the current cursor
//! 2. Advance the cursor to the one returned with the batch (empty batches
//!    included) and route every record, in order, before fetching again
//! 3. On a transient failure wait `retry_interval` and retry the same cursor;
//!    on an expired cursor derive a fresh one after the last routed record
//! 4. Wait `pacing_interval` before the next fetch
//!
//! Shutdown interrupts a fetch or a wait but never the routing of a batch
//! that has already been fetched. The cursor is only ever replaced by a
//! successful fetch or re-derivation, so an interrupted fetch leaves it as it
//! was.

use crate::locator::PartitionLocator;
use crate::router::Router;
use crate::stats::RelayStats;
use shardcast_stream::{Batch, Cursor, PartitionId, StartMode, StreamError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Fetch sizing and timing for partition consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub fetch_limit: usize,
    pub retry_interval: Duration,
    pub pacing_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            fetch_limit: 100,
            retry_interval: Duration::from_millis(1000),
            pacing_interval: Duration::from_millis(200),
        }
    }
}

/// Why a partition consumer stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerExit {
    /// Shutdown was requested
    Shutdown,
    /// The stream closed the partition and every record was routed
    PartitionClosed,
    /// The partition became unreadable
    Failed(StreamError),
}

pub struct PartitionConsumer {
    partition: PartitionId,
    cursor: Cursor,
    /// Where `cursor` was taken; reused if it expires before any record is read
    start_mode: StartMode,
    last_sequence: Option<String>,
    locator: Arc<PartitionLocator>,
    router: Arc<Router>,
    stats: Arc<RelayStats>,
    policy: PollPolicy,
}

impl PartitionConsumer {
    pub fn new(
        partition: PartitionId,
        cursor: Cursor,
        start_mode: StartMode,
        locator: Arc<PartitionLocator>,
        router: Arc<Router>,
        stats: Arc<RelayStats>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            partition,
            cursor,
            start_mode,
            last_sequence: None,
            locator,
            router,
            stats,
            policy,
        }
    }

    pub fn partition(&self) -> &PartitionId {
        &self.partition
    }

    /// Poll the partition until shutdown, closure, or a fatal error
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> ConsumerExit {
        info!(
            target: "shardcast::consumer",
            partition = %self.partition,
            fetch_limit = self.policy.fetch_limit,
            "Partition consumer started"
        );

        self.stats.partition_started();
        let exit = self.poll_loop(&mut shutdown_rx).await;
        self.stats.partition_stopped();

        match &exit {
            ConsumerExit::Shutdown => debug!(
                target: "shardcast::consumer",
                partition = %self.partition,
                "Partition consumer stopped for shutdown"
            ),
            ConsumerExit::PartitionClosed => info!(
                target: "shardcast::consumer",
                partition = %self.partition,
                last_sequence = ?self.last_sequence,
                "Partition closed, consumer finished"
            ),
            ConsumerExit::Failed(e) => error!(
                target: "shardcast::consumer",
                partition = %self.partition,
                error = %e,
                "Partition unreadable, consumer stopped"
            ),
        }

        exit
    }

    async fn poll_loop(&mut self, shutdown_rx: &mut broadcast::Receiver<()>) -> ConsumerExit {
        loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return ConsumerExit::Shutdown,
                result = self.locator.source().fetch(&self.cursor, self.policy.fetch_limit) => result,
            };

            let outcome = match fetched {
                Ok(batch) => self.handle_batch(batch),
                Err(e) => self.handle_fetch_error(e, shutdown_rx).await,
            };
            if let Some(exit) = outcome {
                return exit;
            }

            if !pause(self.policy.pacing_interval, shutdown_rx).await {
                return ConsumerExit::Shutdown;
            }
        }
    }

    fn handle_batch(&mut self, batch: Batch) -> Option<ConsumerExit> {
        if !batch.is_empty() {
            self.stats.record_consumed(batch.records.len() as u64);
            debug!(
                target: "shardcast::consumer",
                partition = %self.partition,
                records = batch.records.len(),
                millis_behind = ?batch.millis_behind,
                "Batch fetched"
            );
        }

        for record in &batch.records {
            if let Err(e) = self.router.route(&record.data) {
                warn!(
                    target: "shardcast::consumer",
                    partition = %self.partition,
                    sequence = %record.sequence,
                    error = %e,
                    "Dropping malformed record"
                );
            }
        }

        if let Some(sequence) = batch.last_sequence() {
            self.last_sequence = Some(sequence.to_string());
        }

        match batch.next_cursor {
            Some(cursor) => {
                self.cursor = cursor;
                None
            },
            None => Some(ConsumerExit::PartitionClosed),
        }
    }

    async fn handle_fetch_error(
        &mut self,
        err: StreamError,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Option<ConsumerExit> {
        self.stats.record_fetch_error();

        if err.is_retryable() {
            warn!(
                target: "shardcast::consumer",
                partition = %self.partition,
                error = %err,
                retry_in_ms = self.policy.retry_interval.as_millis() as u64,
                "Fetch failed, retrying with the same cursor"
            );
            if !pause(self.policy.retry_interval, shutdown_rx).await {
                return Some(ConsumerExit::Shutdown);
            }
            None
        } else if err.is_cursor_expired() {
            warn!(
                target: "shardcast::consumer",
                partition = %self.partition,
                error = %err,
                last_sequence = ?self.last_sequence,
                "Cursor no longer valid, deriving a fresh one"
            );
            self.refresh_cursor(shutdown_rx).await
        } else {
            Some(ConsumerExit::Failed(err))
        }
    }

    /// Replace the cursor with one positioned after the last routed record
    ///
    /// If that record has aged out of the stream the oldest retained record
    /// is the closest position that skips nothing.
    async fn refresh_cursor(
        &mut self,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Option<ConsumerExit> {
        let mut from_horizon = false;

        loop {
            let derived = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => return Some(ConsumerExit::Shutdown),
                result = self.derive_cursor(from_horizon) => result,
            };

            match derived {
                Ok(cursor) => {
                    debug!(
                        target: "shardcast::consumer",
                        partition = %self.partition,
                        cursor = ?cursor,
                        "Cursor re-derived"
                    );
                    self.cursor = cursor;
                    self.stats.record_cursor_reset();
                    return None;
                },
                Err(e) if e.is_cursor_expired() && !from_horizon && self.last_sequence.is_some() => {
                    warn!(
                        target: "shardcast::consumer",
                        partition = %self.partition,
                        error = %e,
                        "Last routed record no longer retained, resuming from the oldest record"
                    );
                    from_horizon = true;
                },
                Err(e) if e.is_fatal() => return Some(ConsumerExit::Failed(e)),
                Err(e) => {
                    warn!(
                        target: "shardcast::consumer",
                        partition = %self.partition,
                        error = %e,
                        "Cursor re-derivation failed, retrying"
                    );
                    if !pause(self.policy.retry_interval, shutdown_rx).await {
                        return Some(ConsumerExit::Shutdown);
                    }
                },
            }
        }
    }

    async fn derive_cursor(&self, from_horizon: bool) -> Result<Cursor, StreamError> {
        if from_horizon {
            self.locator
                .start_cursor(&self.partition, StartMode::TrimHorizon)
                .await
        } else {
            self.locator
                .resume_cursor(
                    &self.partition,
                    self.last_sequence.as_deref(),
                    self.start_mode,
                )
                .await
        }
    }
}

/// Wait for `duration` unless shutdown comes first; false means shutdown
async fn pause(duration: Duration, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_rx.recv() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
