use shardcast_stream::StreamError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Partition discovery failed: {0}")]
    Discovery(String),
}

impl RelayError {
    /// Map a stream failure seen while locating partitions
    pub fn from_discovery(err: StreamError) -> Self {
        match err {
            StreamError::StreamNotFound(name) => Self::StreamNotFound(name),
            other => Self::Discovery(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
