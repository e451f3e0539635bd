//! Partitioned stream sources for the shardcast relay
//!
//! A stream is a set of independently ordered partitions. Each partition is
//! read through an opaque [`Cursor`]: a fetch returns a batch of records plus
//! the cursor to use for the next fetch. [`StreamSource`] is the seam between
//! the relay and a concrete stream service.
//!
//! Two sources ship with this crate:
//! - [`MemoryStream`] - an in-process stream for tests and local runs
//! - `KinesisStream` - Amazon Kinesis Data Streams (feature `kinesis`)

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod error;
#[cfg(feature = "kinesis")]
pub mod kinesis;
pub mod memory;
mod source;
mod types;

pub use error::{Result, StreamError};
#[cfg(feature = "kinesis")]
pub use kinesis::{KinesisConfig, KinesisStream};
pub use memory::MemoryStream;
pub use source::StreamSource;
pub use types::{Batch, Cursor, PartitionId, StartMode, StartPosition, StreamRecord};
