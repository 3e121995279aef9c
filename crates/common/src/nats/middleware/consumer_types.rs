use async_nats::HeaderMap;
use bytes::Bytes;

/// Request type for consuming a single NATS message through Tower.
///
/// This owns all the message data, allowing it to be passed through
/// Tower middleware layers without lifetime concerns.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    /// The NATS subject the message was published to
    pub subject: String,
    /// The message payload
    pub payload: Bytes,
    /// Optional headers (trace context, message key, source id)
    pub headers: Option<HeaderMap>,
}

impl ConsumeRequest {
    pub fn new(subject: String, payload: Bytes, headers: Option<HeaderMap>) -> Self {
        Self {
            subject,
            payload,
            headers,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .as_ref()
            .and_then(|headers| headers.get(name))
            .map(|value| value.as_str())
    }
}

/// Disposition of a consumed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    /// Processed (or deliberately dropped) - acknowledge it
    Ack,
    /// Transient failure - reject it for redelivery
    Nak(Option<String>),
    /// Unprocessable - acknowledge and never redeliver
    Term(Option<String>),
}

impl ConsumeResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(Some(reason.into()))
    }

    pub fn term(reason: impl Into<String>) -> Self {
        Self::Term(Some(reason.into()))
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn is_nak(&self) -> bool {
        matches!(self, Self::Nak(_))
    }

    pub fn is_term(&self) -> bool {
        matches!(self, Self::Term(_))
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nak(_) => "nak",
            Self::Term(_) => "term",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_request_new() {
        let req = ConsumeRequest::new("test.subject".to_string(), Bytes::from("payload"), None);

        assert_eq!(req.subject, "test.subject");
        assert_eq!(req.payload, Bytes::from("payload"));
        assert!(req.headers.is_none());
        assert!(req.header("Message-Key").is_none());
    }

    #[test]
    fn test_consume_request_header() {
        let mut headers = HeaderMap::new();
        headers.insert("Message-Key", "42.7");
        let req = ConsumeRequest::new("streaming.1".to_string(), Bytes::new(), Some(headers));

        assert_eq!(req.header("Message-Key"), Some("42.7"));
        assert!(req.header("Source-Id").is_none());
    }

    #[test]
    fn test_consume_response_ack() {
        let resp = ConsumeResponse::ack();
        assert!(resp.is_ack());
        assert!(!resp.is_nak());
        assert_eq!(resp.outcome(), "ack");
    }

    #[test]
    fn test_consume_response_nak() {
        let resp = ConsumeResponse::nak("test error");
        assert!(!resp.is_ack());
        assert!(resp.is_nak());

        if let ConsumeResponse::Nak(Some(reason)) = resp {
            assert_eq!(reason, "test error");
        } else {
            panic!("Expected Nak with reason");
        }
    }

    #[test]
    fn test_consume_response_term() {
        let resp = ConsumeResponse::term("unknown strategy");
        assert!(resp.is_term());
        assert!(!resp.is_ack());
        assert_eq!(resp.outcome(), "term");
    }
}
