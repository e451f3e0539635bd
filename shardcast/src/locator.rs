use crate::error::{RelayError, Result};
use shardcast_stream::{Cursor, PartitionId, StartMode, StartPosition, StreamError, StreamSource};
use std::sync::Arc;
use tracing::{debug, info};

/// Finds the stream's partitions and where to start reading each
pub struct PartitionLocator {
    source: Arc<dyn StreamSource>,
    start_mode: StartMode,
}

impl PartitionLocator {
    pub fn new(source: Arc<dyn StreamSource>, start_mode: StartMode) -> Self {
        Self { source, start_mode }
    }

    pub fn source(&self) -> &Arc<dyn StreamSource> {
        &self.source
    }

    pub fn start_mode(&self) -> StartMode {
        self.start_mode
    }

    /// List the partitions currently in the stream
    ///
    /// A stream without partitions is a discovery failure: relaying from
    /// nothing would look healthy while delivering nothing.
    pub async fn list_partitions(&self) -> Result<Vec<PartitionId>> {
        let partitions = self
            .source
            .list_partitions()
            .await
            .map_err(RelayError::from_discovery)?;

        if partitions.is_empty() {
            return Err(RelayError::Discovery(format!(
                "stream {} has no partitions",
                self.source.name()
            )));
        }

        info!(
            target: "shardcast::locator",
            stream = %self.source.name(),
            partitions = partitions.len(),
            "Partitions discovered"
        );

        Ok(partitions)
    }

    /// Cursor for `partition` at the given start mode
    pub async fn start_cursor(
        &self,
        partition: &PartitionId,
        mode: StartMode,
    ) -> std::result::Result<Cursor, StreamError> {
        let cursor = self
            .source
            .start_cursor(partition, &StartPosition::from(mode))
            .await?;

        debug!(
            target: "shardcast::locator",
            partition = %partition,
            mode = %mode,
            cursor = ?cursor,
            "Start cursor obtained"
        );

        Ok(cursor)
    }

    /// Cursor positioned right after `last_sequence`, or at `mode` when
    /// nothing has been read from the partition yet
    pub async fn resume_cursor(
        &self,
        partition: &PartitionId,
        last_sequence: Option<&str>,
        mode: StartMode,
    ) -> std::result::Result<Cursor, StreamError> {
        match last_sequence {
            Some(sequence) => {
                self.source
                    .start_cursor(
                        partition,
                        &StartPosition::AfterSequence(sequence.to_string()),
                    )
                    .await
            },
            None => self.start_cursor(partition, mode).await,
        }
    }
}
