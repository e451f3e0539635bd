//! In-process stream
//!
//! [`MemoryStream`] keeps every partition as a vector of records and hands
//! out cursors of the form `partition:generation:offset`. It supports the
//! failure modes the relay has to survive, so tests can drive them
//! deterministically:
//! - [`MemoryStream::inject_fault`] makes the next fetch on a partition fail
//! - [`MemoryStream::expire_cursors`] invalidates every outstanding cursor
//! - [`MemoryStream::close_partition`] ends a partition after its last record
//! - [`MemoryStream::delete`] makes the whole stream disappear

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Result, StreamError};
use crate::source::StreamSource;
use crate::types::{Batch, Cursor, PartitionId, StartPosition, StreamRecord};

#[derive(Default)]
struct PartitionLog {
    records: Vec<StreamRecord>,
    generation: u64,
    faults: VecDeque<StreamError>,
    closed: bool,
    fetches: u64,
}

#[derive(Default)]
struct State {
    partitions: BTreeMap<PartitionId, PartitionLog>,
    deleted: bool,
}

/// An in-memory partitioned stream
pub struct MemoryStream {
    name: String,
    state: Mutex<State>,
}

impl MemoryStream {
    /// Create an empty stream with no partitions
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Create a stream with `count` partitions named like Kinesis shards
    pub fn with_partitions(name: impl Into<String>, count: usize) -> Self {
        let stream = Self::new(name);
        for _ in 0..count {
            stream.add_partition();
        }
        stream
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a partition and return its id
    pub fn add_partition(&self) -> PartitionId {
        let mut state = self.lock();
        let id = PartitionId::new(format!("shardId-{:012}", state.partitions.len()));
        state.partitions.insert(id.clone(), PartitionLog::default());
        id
    }

    /// Append a record and return its sequence
    pub fn append(&self, partition: &PartitionId, data: impl Into<Bytes>) -> Result<String> {
        let mut state = self.lock();
        let log = state
            .partitions
            .get_mut(partition)
            .ok_or_else(|| StreamError::PartitionNotFound(partition.to_string()))?;
        if log.closed {
            return Err(StreamError::PartitionNotFound(format!(
                "{} is closed",
                partition
            )));
        }
        let sequence = format_sequence(log.records.len() as u64);
        log.records.push(StreamRecord::new(sequence.clone(), data));
        Ok(sequence)
    }

    /// Make the next fetch on `partition` fail with `error`
    ///
    /// Faults queue up; each fetch consumes one.
    pub fn inject_fault(&self, partition: &PartitionId, error: StreamError) {
        if let Some(log) = self.lock().partitions.get_mut(partition) {
            log.faults.push_back(error);
        }
    }

    /// Invalidate every cursor issued so far for `partition`
    pub fn expire_cursors(&self, partition: &PartitionId) {
        if let Some(log) = self.lock().partitions.get_mut(partition) {
            log.generation += 1;
        }
    }

    /// Stop accepting appends; readers get no next cursor once drained
    pub fn close_partition(&self, partition: &PartitionId) {
        if let Some(log) = self.lock().partitions.get_mut(partition) {
            log.closed = true;
        }
    }

    /// Make the stream behave as if it had been deleted
    pub fn delete(&self) {
        self.lock().deleted = true;
    }

    /// Number of fetches served (or failed) for `partition`
    pub fn fetch_count(&self, partition: &PartitionId) -> u64 {
        self.lock()
            .partitions
            .get(partition)
            .map(|log| log.fetches)
            .unwrap_or(0)
    }

    /// Number of records appended to `partition`
    pub fn record_count(&self, partition: &PartitionId) -> usize {
        self.lock()
            .partitions
            .get(partition)
            .map(|log| log.records.len())
            .unwrap_or(0)
    }

    fn check_exists(&self, state: &State) -> Result<()> {
        if state.deleted {
            return Err(StreamError::StreamNotFound(self.name.clone()));
        }
        Ok(())
    }
}

fn format_sequence(index: u64) -> String {
    format!("{:020}", index)
}

fn encode_cursor(partition: &PartitionId, generation: u64, offset: usize) -> Cursor {
    Cursor::new(format!("{}:{}:{}", partition, generation, offset))
}

fn decode_cursor(cursor: &Cursor) -> Result<(PartitionId, u64, usize)> {
    let invalid = || StreamError::InvalidCursor(cursor.as_str().to_string());
    let mut parts = cursor.as_str().rsplitn(3, ':');
    let offset = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
    let generation = parts.next().and_then(|s| s.parse().ok()).ok_or_else(invalid)?;
    let partition = parts.next().ok_or_else(invalid)?;
    Ok((PartitionId::from(partition), generation, offset))
}

#[async_trait]
impl StreamSource for MemoryStream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_partitions(&self) -> Result<Vec<PartitionId>> {
        let state = self.lock();
        self.check_exists(&state)?;
        Ok(state.partitions.keys().cloned().collect())
    }

    async fn start_cursor(
        &self,
        partition: &PartitionId,
        position: &StartPosition,
    ) -> Result<Cursor> {
        let state = self.lock();
        self.check_exists(&state)?;
        let log = state
            .partitions
            .get(partition)
            .ok_or_else(|| StreamError::PartitionNotFound(partition.to_string()))?;

        let offset = match position {
            StartPosition::Latest => log.records.len(),
            StartPosition::TrimHorizon => 0,
            StartPosition::AfterSequence(sequence) => {
                let index: usize = sequence
                    .parse()
                    .map_err(|_| StreamError::InvalidCursor(sequence.clone()))?;
                if index >= log.records.len() {
                    return Err(StreamError::InvalidCursor(sequence.clone()));
                }
                index + 1
            },
        };

        Ok(encode_cursor(partition, log.generation, offset))
    }

    async fn fetch(&self, cursor: &Cursor, limit: usize) -> Result<Batch> {
        let (partition, generation, offset) = decode_cursor(cursor)?;

        let mut state = self.lock();
        self.check_exists(&state)?;
        let log = state
            .partitions
            .get_mut(&partition)
            .ok_or_else(|| StreamError::PartitionNotFound(partition.to_string()))?;

        log.fetches += 1;

        if let Some(fault) = log.faults.pop_front() {
            return Err(fault);
        }
        if generation != log.generation {
            return Err(StreamError::CursorExpired(cursor.as_str().to_string()));
        }
        if offset > log.records.len() {
            return Err(StreamError::InvalidCursor(cursor.as_str().to_string()));
        }

        let end = offset.saturating_add(limit).min(log.records.len());
        let records = log.records[offset..end].to_vec();
        let next_cursor = if log.closed && end == log.records.len() {
            None
        } else {
            Some(encode_cursor(&partition, generation, end))
        };

        Ok(Batch {
            records,
            next_cursor,
            millis_behind: Some(0),
        })
    }
}
