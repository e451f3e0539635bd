//! Routed record format
//!
//! Producers append one UTF-8 JSON object per response:
//!
//! ```text
//! {"clientId": "<string>", "message": <any JSON value>}
//! ```
//!
//! `message` is re-serialized as compact JSON before it is sent, keeping
//! key order.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// A record that could not be parsed as a [`RoutedMessage`]
#[derive(Error, Debug)]
#[error("Malformed record: {0}")]
pub struct MalformedRecord(#[from] serde_json::Error);

#[derive(Debug, Deserialize)]
pub struct RoutedMessage {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub message: Value,
}

impl RoutedMessage {
    pub fn parse(raw: &[u8]) -> Result<Self, MalformedRecord> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// The payload as compact JSON text
    pub fn payload(&self) -> String {
        self.message.to_string()
    }
}
