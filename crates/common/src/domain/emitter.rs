use crate::domain::{DomainResult, OutputChannel};
use async_trait::async_trait;

/// Header carrying `<deviceId>.<packetId>` on inbound messages.
pub const MESSAGE_KEY_HEADER: &str = "Message-Key";
/// Header naming the stage that produced a message.
pub const SOURCE_ID_HEADER: &str = "Source-Id";
/// Source id stamped on every write re-emitted by the DLQ replayer.
pub const REPLAY_SOURCE_ID: &str = "dlq-replayer";

/// A message bound for one of the pipeline's output channels.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub channel: OutputChannel,
    pub project_id: u64,
    pub key: Option<String>,
    pub source: Option<String>,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(channel: OutputChannel, project_id: u64, payload: Vec<u8>) -> Self {
        Self {
            channel,
            project_id,
            key: None,
            source: None,
            payload,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn subject(&self) -> String {
        self.channel.subject(self.project_id)
    }
}

/// Publishes stage output. Returns once the broker has acknowledged the message.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait StreamEmitter: Send + Sync {
    async fn emit(&self, message: OutboundMessage) -> DomainResult<()>;
}
