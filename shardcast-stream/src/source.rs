use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Batch, Cursor, PartitionId, StartPosition};

/// A partitioned, append-only stream that can be read by cursor
///
/// Implementations must be safe to share between the per-partition consumer
/// tasks; each task only ever passes cursors for its own partition.
#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Name of the underlying stream, for logging
    fn name(&self) -> &str;

    /// List the partitions currently present in the stream
    ///
    /// Fails with [`StreamError::StreamNotFound`](crate::StreamError) when the
    /// stream does not exist.
    async fn list_partitions(&self) -> Result<Vec<PartitionId>>;

    /// Obtain a cursor for `partition` at the requested position
    async fn start_cursor(
        &self,
        partition: &PartitionId,
        position: &StartPosition,
    ) -> Result<Cursor>;

    /// Fetch up to `limit` records at `cursor`
    async fn fetch(&self, cursor: &Cursor, limit: usize) -> Result<Batch>;
}
