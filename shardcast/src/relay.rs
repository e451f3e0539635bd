//! Relay supervisor
//!
//! Wires the pieces together for one run of the process: discovers the
//! stream's partitions, starts one consumer per partition, serves the
//! acceptor on the given listener and, once shutdown is signalled, drains
//! the consumers.

use crate::acceptor::{Acceptor, InboundHandler, LoggingInbound};
use crate::config::Config;
use crate::consumer::{PartitionConsumer, PollPolicy};
use crate::error::{RelayError, Result};
use crate::locator::PartitionLocator;
use crate::registry::ConnectionRegistry;
use crate::router::Router;
use crate::shutdown::{self, ConsumerTasks, DRAIN_TIMEOUT};
use crate::stats::{self, RelayStats};
use shardcast_stream::{Cursor, PartitionId, StartMode, StreamSource};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub struct Relay {
    config: Config,
    source: Arc<dyn StreamSource>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<RelayStats>,
    inbound: Arc<dyn InboundHandler>,
    drain_timeout: Duration,
}

impl Relay {
    pub fn new(config: Config, source: Arc<dyn StreamSource>) -> Self {
        Self {
            config,
            source,
            registry: Arc::new(ConnectionRegistry::new()),
            stats: Arc::new(RelayStats::new()),
            inbound: Arc::new(LoggingInbound),
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    pub fn with_inbound(mut self, inbound: Arc<dyn InboundHandler>) -> Self {
        self.inbound = inbound;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    /// Run until `shutdown_tx` fires
    ///
    /// Fails without serving anything if the stream cannot be discovered or
    /// a partition's start cursor cannot be obtained.
    pub async fn run(self, listener: TcpListener, shutdown_tx: broadcast::Sender<()>) -> Result<()> {
        let locator = Arc::new(PartitionLocator::new(
            Arc::clone(&self.source),
            self.config.stream.start_position,
        ));
        let router = Arc::new(Router::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.stats),
        ));

        let mut supervisor = Supervisor {
            shutdown_rx: shutdown_tx.subscribe(),
            shutdown_tx: shutdown_tx.clone(),
            stopping: false,
            locator: Arc::clone(&locator),
            router,
            stats: Arc::clone(&self.stats),
            policy: self.config.poll_policy(),
            tasks: ConsumerTasks::new(),
            known: HashSet::new(),
        };

        let partitions = locator.list_partitions().await?;
        let mode = locator.start_mode();
        let mut starts = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let cursor = locator
                .start_cursor(&partition, mode)
                .await
                .map_err(RelayError::from_discovery)?;
            starts.push((partition, cursor));
        }
        for (partition, cursor) in starts {
            supervisor.spawn(partition, cursor, mode);
        }

        info!(
            target: "shardcast::relay",
            stream = %self.source.name(),
            partitions = supervisor.known.len(),
            start_position = %mode,
            "Partition consumers started"
        );

        if let Some(interval) = self.config.stats_interval() {
            tokio::spawn(stats::run_stats_logger(
                Arc::clone(&self.stats),
                interval,
                shutdown_tx.subscribe(),
            ));
        }

        let app = Acceptor::new(Arc::clone(&self.registry), Arc::clone(&self.stats))
            .with_inbound(Arc::clone(&self.inbound))
            .with_shutdown(shutdown_tx.clone())
            .into_router();
        let local_addr = listener.local_addr()?;
        let mut server_shutdown_rx = shutdown_tx.subscribe();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown_rx.recv().await;
                })
                .await
        });

        info!(target: "shardcast::relay", addr = %local_addr, "Accepting client connections");

        let mut discovery = self.config.discovery_interval().map(|period| {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        let mut server_result = None;
        while !supervisor.stopping {
            tokio::select! {
                _ = supervisor.shutdown_rx.recv() => {
                    supervisor.stopping = true;
                },
                _ = next_tick(&mut discovery) => {
                    supervisor.rediscover().await;
                },
                Some(joined) = supervisor.tasks.join_next() => {
                    match joined {
                        Ok((partition, exit)) => debug!(
                            target: "shardcast::relay",
                            partition = %partition,
                            exit = ?exit,
                            "Consumer finished"
                        ),
                        Err(e) => error!(
                            target: "shardcast::relay",
                            error = %e,
                            "Consumer task panicked"
                        ),
                    }
                },
                result = &mut server => {
                    server_result = Some(result);
                    break;
                },
            }
        }

        // Covers the acceptor failing on its own
        let _ = shutdown_tx.send(());

        let server_result = match server_result {
            Some(result) => Some(result),
            None => tokio::time::timeout(self.drain_timeout, &mut server).await.ok(),
        };

        let failure = match server_result {
            Some(Ok(Ok(()))) => None,
            Some(Ok(Err(e))) => {
                error!(target: "shardcast::relay", error = %e, "Acceptor failed");
                Some(RelayError::Io(e))
            },
            Some(Err(e)) => {
                error!(target: "shardcast::relay", error = %e, "Acceptor task panicked");
                None
            },
            None => {
                warn!(target: "shardcast::relay", "Acceptor did not stop in time");
                server.abort();
                None
            },
        };

        if !shutdown::drain_consumers(&mut supervisor.tasks, self.drain_timeout).await {
            warn!(target: "shardcast::relay", "Drain timed out, some consumers were aborted");
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

struct Supervisor {
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    stopping: bool,
    locator: Arc<PartitionLocator>,
    router: Arc<Router>,
    stats: Arc<RelayStats>,
    policy: PollPolicy,
    tasks: ConsumerTasks,
    known: HashSet<PartitionId>,
}

impl Supervisor {
    /// Start a consumer for `partition` unless shutdown is already underway
    fn spawn(&mut self, partition: PartitionId, cursor: Cursor, mode: StartMode) {
        // Subscribe before checking so a signal sent in between is not lost
        let consumer_shutdown_rx = self.shutdown_tx.subscribe();
        if self.shutdown_pending() {
            return;
        }

        self.known.insert(partition.clone());
        let consumer = PartitionConsumer::new(
            partition.clone(),
            cursor,
            mode,
            Arc::clone(&self.locator),
            Arc::clone(&self.router),
            Arc::clone(&self.stats),
            self.policy,
        );
        self.tasks.spawn(async move {
            let exit = consumer.run(consumer_shutdown_rx).await;
            (partition, exit)
        });
    }

    fn shutdown_pending(&mut self) -> bool {
        if !self.stopping {
            self.stopping = !matches!(self.shutdown_rx.try_recv(), Err(TryRecvError::Empty));
        }
        self.stopping
    }

    /// Start consumers for partitions that appeared since the last listing
    ///
    /// New partitions read from the oldest retained record: they were created
    /// after startup, so nothing in them predates the relay.
    async fn rediscover(&mut self) {
        let partitions = match self.locator.list_partitions().await {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!(
                    target: "shardcast::relay",
                    error = %e,
                    "Partition rediscovery failed, retrying next interval"
                );
                return;
            },
        };

        for partition in partitions {
            if self.known.contains(&partition) {
                continue;
            }

            match self
                .locator
                .start_cursor(&partition, StartMode::TrimHorizon)
                .await
            {
                Ok(cursor) => {
                    info!(
                        target: "shardcast::relay",
                        partition = %partition,
                        "New partition discovered"
                    );
                    self.spawn(partition, cursor, StartMode::TrimHorizon);
                },
                Err(e) => warn!(
                    target: "shardcast::relay",
                    partition = %partition,
                    error = %e,
                    "Start cursor for new partition unavailable, retrying next interval"
                ),
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        },
        None => std::future::pending().await,
    }
}
