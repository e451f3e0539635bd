//! Amazon Kinesis Data Streams source
//!
//! Partitions are shards and cursors are shard iterators. Error codes
//! returned by the service are mapped onto [`StreamError`] so the relay can
//! tell throttling and expired iterators apart from a missing stream.

use async_trait::async_trait;
use aws_sdk_kinesis::Client;
use aws_sdk_kinesis::config::Region;
use aws_sdk_kinesis::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kinesis::types::ShardIteratorType;
use bytes::Bytes;
use tracing::{debug, info};

use crate::error::{Result, StreamError};
use crate::source::StreamSource;
use crate::types::{Batch, Cursor, PartitionId, StartPosition, StreamRecord};

/// GetRecords accepts at most this many records per call
const MAX_GET_RECORDS_LIMIT: i32 = 10_000;

/// Connection settings for a Kinesis stream
#[derive(Debug, Clone)]
pub struct KinesisConfig {
    pub stream_name: String,
    pub region: String,
    /// Override for the service endpoint (LocalStack, VPC endpoints)
    pub endpoint_url: Option<String>,
}

/// A Kinesis data stream read through shard iterators
pub struct KinesisStream {
    client: Client,
    stream_name: String,
}

/// Which resource a `ResourceNotFoundException` refers to
#[derive(Clone, Copy)]
enum Scope<'a> {
    Stream,
    Partition(&'a str),
}

impl KinesisStream {
    /// Build a client from the default AWS credential chain
    pub async fn connect(config: KinesisConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(url) = &config.endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let sdk_config = loader.load().await;

        info!(
            target: "shardcast::kinesis",
            stream = %config.stream_name,
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "Kinesis client configured"
        );

        Self::from_client(Client::new(&sdk_config), config.stream_name)
    }

    /// Wrap an existing client
    pub fn from_client(client: Client, stream_name: impl Into<String>) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
        }
    }
}

fn classify<E, R>(err: SdkError<E, R>, scope: Scope<'_>) -> StreamError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = DisplayErrorContext(&err).to_string();

    let code = match &err {
        SdkError::ServiceError(service) => service.err().code().map(str::to_string),
        // Timeouts, dispatch failures and unparseable responses
        _ => return StreamError::Transport(message),
    };

    match code.as_deref() {
        Some("ResourceNotFoundException") => match scope {
            Scope::Stream => StreamError::StreamNotFound(message),
            Scope::Partition(id) => StreamError::PartitionNotFound(format!("{}: {}", id, message)),
        },
        Some("ExpiredIteratorException") => StreamError::CursorExpired(message),
        Some("ProvisionedThroughputExceededException")
        | Some("LimitExceededException")
        | Some("KMSThrottlingException") => StreamError::Throttled(message),
        Some("AccessDeniedException")
        | Some("KMSAccessDeniedException")
        | Some("KMSDisabledException")
        | Some("KMSNotFoundException") => StreamError::AccessDenied(message),
        Some("InvalidArgumentException") => match scope {
            Scope::Stream => StreamError::StreamNotFound(message),
            Scope::Partition(_) => StreamError::InvalidCursor(message),
        },
        _ => StreamError::Transport(message),
    }
}

#[async_trait]
impl StreamSource for KinesisStream {
    fn name(&self) -> &str {
        &self.stream_name
    }

    async fn list_partitions(&self) -> Result<Vec<PartitionId>> {
        let mut partitions = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            // A paginated ListShards call must not repeat the stream name
            let request = match &next_token {
                Some(token) => self.client.list_shards().next_token(token),
                None => self.client.list_shards().stream_name(&self.stream_name),
            };
            let output = request
                .send()
                .await
                .map_err(|e| classify(e, Scope::Stream))?;

            partitions.extend(
                output
                    .shards()
                    .iter()
                    .map(|shard| PartitionId::new(shard.shard_id())),
            );

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(
            target: "shardcast::kinesis",
            stream = %self.stream_name,
            shards = partitions.len(),
            "Listed shards"
        );

        Ok(partitions)
    }

    async fn start_cursor(
        &self,
        partition: &PartitionId,
        position: &StartPosition,
    ) -> Result<Cursor> {
        let request = self
            .client
            .get_shard_iterator()
            .stream_name(&self.stream_name)
            .shard_id(partition.as_str());

        let request = match position {
            StartPosition::Latest => request.shard_iterator_type(ShardIteratorType::Latest),
            StartPosition::TrimHorizon => {
                request.shard_iterator_type(ShardIteratorType::TrimHorizon)
            },
            StartPosition::AfterSequence(sequence) => request
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(sequence),
        };

        let output = request
            .send()
            .await
            .map_err(|e| classify(e, Scope::Partition(partition.as_str())))?;

        output.shard_iterator().map(Cursor::new).ok_or_else(|| {
            StreamError::Transport(format!("no shard iterator returned for {}", partition))
        })
    }

    async fn fetch(&self, cursor: &Cursor, limit: usize) -> Result<Batch> {
        let limit = i32::try_from(limit)
            .unwrap_or(MAX_GET_RECORDS_LIMIT)
            .clamp(1, MAX_GET_RECORDS_LIMIT);

        let output = self
            .client
            .get_records()
            .shard_iterator(cursor.as_str())
            .limit(limit)
            .send()
            .await
            .map_err(|e| classify(e, Scope::Partition("shard iterator")))?;

        let records = output
            .records()
            .iter()
            .map(|record| {
                StreamRecord::new(
                    record.sequence_number(),
                    Bytes::copy_from_slice(record.data().as_ref()),
                )
            })
            .collect();

        Ok(Batch {
            records,
            next_cursor: output.next_shard_iterator().map(Cursor::new),
            millis_behind: output.millis_behind_latest(),
        })
    }
}
