//! Test doubles shared by the worker crates.

use crate::domain::{DomainError, DomainResult, OutboundMessage, OutputChannel, StreamEmitter};
use async_trait::async_trait;
use std::sync::Mutex;

/// Emitter that records every message and can be told to fail on chosen channels.
#[derive(Default)]
pub struct RecordingEmitter {
    messages: Mutex<Vec<OutboundMessage>>,
    failing: Mutex<Vec<OutputChannel>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(self, channel: OutputChannel) -> Self {
        self.failing.lock().unwrap().push(channel);
        self
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn on(&self, channel: OutputChannel) -> Vec<OutboundMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.channel == channel)
            .collect()
    }

    pub fn count(&self, channel: OutputChannel) -> usize {
        self.on(channel).len()
    }
}

#[async_trait]
impl StreamEmitter for RecordingEmitter {
    async fn emit(&self, message: OutboundMessage) -> DomainResult<()> {
        if self.failing.lock().unwrap().contains(&message.channel) {
            return Err(DomainError::PublishError(format!(
                "{} unavailable",
                message.channel
            )));
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}
