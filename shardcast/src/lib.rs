//! shardcast relays records from a partitioned stream to live WebSocket
//! clients.
//!
//! Producers append `{"clientId": .., "message": ..}` records to the stream.
//! Every partition gets its own consumer; each consumed record is routed to
//! the connection currently registered under its `clientId`, or dropped if
//! there is none.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod acceptor;
pub mod cli;
pub mod config;
pub mod consumer;
mod error;
pub mod locator;
pub mod record;
pub mod registry;
pub mod relay;
pub mod router;
pub mod shutdown;
pub mod stats;

pub use acceptor::{Acceptor, Inbound, InboundHandler, LoggingInbound};
pub use config::Config;
pub use consumer::{ConsumerExit, PartitionConsumer, PollPolicy};
pub use error::{RelayError, Result};
pub use locator::PartitionLocator;
pub use record::{MalformedRecord, RoutedMessage};
pub use registry::{ConnectionHandle, ConnectionRegistry, Outbound};
pub use relay::Relay;
pub use router::{Delivery, Router};
pub use stats::{RelayStats, StatsSnapshot};
