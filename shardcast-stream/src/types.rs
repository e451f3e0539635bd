use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of one independently ordered slice of a stream
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(String);

impl PartitionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PartitionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque position token identifying where the next read in a partition
/// resumes. Only the source that issued a cursor can interpret it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Shard iterators are long base64 blobs; keep log lines readable.
impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SHOWN: usize = 16;
        match self.0.char_indices().nth(SHOWN) {
            Some((idx, _)) => write!(f, "Cursor({}..)", &self.0[..idx]),
            None => write!(f, "Cursor({})", self.0),
        }
    }
}

/// Where a freshly located partition should start reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// Only records appended after the cursor is obtained
    #[default]
    Latest,
    /// The oldest record still retained by the stream
    TrimHorizon,
}

impl fmt::Display for StartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::TrimHorizon => f.write_str("trim_horizon"),
        }
    }
}

impl FromStr for StartMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "latest" | "now" => Ok(Self::Latest),
            "trim_horizon" | "earliest" => Ok(Self::TrimHorizon),
            other => Err(format!(
                "unknown start position '{}' (expected latest or trim_horizon)",
                other
            )),
        }
    }
}

/// A concrete request for a starting cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    Latest,
    TrimHorizon,
    /// Immediately after the record with this sequence
    AfterSequence(String),
}

impl From<StartMode> for StartPosition {
    fn from(mode: StartMode) -> Self {
        match mode {
            StartMode::Latest => Self::Latest,
            StartMode::TrimHorizon => Self::TrimHorizon,
        }
    }
}

/// One record as read from a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    /// Position of the record within its partition, increasing in append order
    pub sequence: String,
    pub data: Bytes,
}

impl StreamRecord {
    pub fn new(sequence: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            sequence: sequence.into(),
            data: data.into(),
        }
    }
}

/// Result of one fetch against a partition
#[derive(Debug, Clone)]
pub struct Batch {
    /// Records in append order
    pub records: Vec<StreamRecord>,
    /// Cursor for the next fetch; `None` once a closed partition is drained
    pub next_cursor: Option<Cursor>,
    /// How far behind the tip of the partition this batch is, if known
    pub millis_behind: Option<i64>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_sequence(&self) -> Option<&str> {
        self.records.last().map(|r| r.sequence.as_str())
    }
}
