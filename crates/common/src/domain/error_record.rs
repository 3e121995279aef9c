use crate::domain::SinkWrite;
use serde::{Deserialize, Serialize};

/// Structured record written to the error sink when a message cannot be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: i64,
    pub message: String,
    pub original_payload: String,
}

impl ErrorRecord {
    pub fn new(
        timestamp: i64,
        message: impl Into<String>,
        original_payload: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            message: message.into(),
            original_payload: original_payload.into(),
        }
    }

    /// Builds a record from raw bytes, keeping them as lossy UTF-8.
    pub fn from_bytes(timestamp: i64, message: impl Into<String>, original: &[u8]) -> Self {
        Self::new(timestamp, message, String::from_utf8_lossy(original))
    }

    pub fn into_write(self) -> SinkWrite {
        SinkWrite::Error {
            timestamp: self.timestamp,
            message: self.message,
            original_payload: self.original_payload,
        }
    }
}
