use thiserror::Error;

/// Errors raised by a [`StreamSource`](crate::StreamSource)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Throttled: {0}")]
    Throttled(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Cursor expired: {0}")]
    CursorExpired(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}

impl StreamError {
    /// Returns true if the same request may succeed when repeated after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Transport(_))
    }

    /// Returns true if the cursor can no longer be used and a fresh one must
    /// be derived before reading on.
    pub fn is_cursor_expired(&self) -> bool {
        matches!(self, Self::CursorExpired(_) | Self::InvalidCursor(_))
    }

    /// Returns true if the stream or partition is permanently unreadable.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable() && !self.is_cursor_expired()
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
