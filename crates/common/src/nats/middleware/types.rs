use crate::domain::{OutboundMessage, MESSAGE_KEY_HEADER, SOURCE_ID_HEADER};
use async_nats::HeaderMap;
use bytes::Bytes;

/// Request to publish a message to NATS
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Trace context is injected here by the tracing layer
    pub headers: HeaderMap,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|value| value.as_str())
    }
}

impl From<OutboundMessage> for PublishRequest {
    fn from(message: OutboundMessage) -> Self {
        let mut request = PublishRequest::new(message.subject(), message.payload);
        if let Some(key) = &message.key {
            request = request.with_header(MESSAGE_KEY_HEADER, key);
        }
        if let Some(source) = &message.source {
            request = request.with_header(SOURCE_ID_HEADER, source);
        }
        request
    }
}

/// Response from a publish operation
#[derive(Debug)]
pub struct PublishResponse {
    pub subject: String,
}
