use crate::domain::{IngestInput, IngestService};
use chrono::Utc;
use common::domain::MESSAGE_KEY_HEADER;
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, warn};

/// Tower service feeding inbound `streaming.<projectId>` messages to the deserializer.
///
/// Decode problems are handled inside the domain service, so the message is
/// acknowledged; only a failed publish asks for redelivery.
#[derive(Clone)]
pub struct IngestConsumerService {
    domain_service: Arc<IngestService>,
}

impl IngestConsumerService {
    pub fn new(domain_service: Arc<IngestService>) -> Self {
        Self { domain_service }
    }
}

impl Service<ConsumeRequest> for IngestConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let domain_service = Arc::clone(&self.domain_service);

        Box::pin(async move {
            let subject = req.subject.clone();
            let input = IngestInput::Message {
                key: req.header(MESSAGE_KEY_HEADER).map(str::to_string),
                subject: req.subject,
                payload: req.payload.to_vec(),
            };

            match domain_service
                .handle(input, Utc::now().timestamp_millis())
                .await
            {
                Ok(()) => {
                    debug!(subject = %subject, "ingested message");
                    Ok(ConsumeResponse::ack())
                }
                Err(e) => {
                    warn!(subject = %subject, error = %e, "failed to publish ingest outcome");
                    Ok(ConsumeResponse::nak(e.to_string()))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DecoderRegistry, PacketDeserializer};
    use async_nats::HeaderMap;
    use bytes::Bytes;
    use common::domain::{encoding, OutputChannel};
    use common::testing::RecordingEmitter;
    use common::PipelineConfig;
    use std::collections::HashMap;

    fn consumer_service(emitter: Arc<RecordingEmitter>) -> IngestConsumerService {
        let mut properties = HashMap::new();
        properties.insert("project.id".to_string(), "1".to_string());
        properties.insert(
            "packet.8".to_string(),
            r#"{"id": 8, "name": "door", "format": "csv",
                "fields": [{"id": 1, "name": "open", "type": "BOOLEAN"}]}"#
                .to_string(),
        );
        let config = PipelineConfig::from_properties(&properties).unwrap();
        let deserializer =
            PacketDeserializer::new(&config, Arc::new(DecoderRegistry::standard())).unwrap();
        IngestConsumerService::new(Arc::new(IngestService::new(
            Arc::new(deserializer),
            emitter,
        )))
    }

    fn request(key: &str, csv: &str) -> ConsumeRequest {
        let mut headers = HeaderMap::new();
        headers.insert(MESSAGE_KEY_HEADER, key);
        ConsumeRequest::new(
            "streaming.1".to_string(),
            Bytes::from(encoding::encode(csv.as_bytes())),
            Some(headers),
        )
    }

    #[tokio::test]
    async fn test_acks_decoded_packet() {
        let emitter = Arc::new(RecordingEmitter::new());
        let response = consumer_service(emitter.clone())
            .call(request("3.8", "true"))
            .await
            .unwrap();

        assert_eq!(response, ConsumeResponse::Ack);
        assert_eq!(emitter.count(OutputChannel::Packets), 1);
    }

    #[tokio::test]
    async fn test_acks_decode_failure_after_error_sink() {
        let emitter = Arc::new(RecordingEmitter::new());
        let response = consumer_service(emitter.clone())
            .call(request("3.8", "true,false,true"))
            .await
            .unwrap();

        assert!(response.is_ack());
        assert_eq!(
            emitter.count(OutputChannel::Sink(common::ConversionStrategy::Error)),
            1
        );
    }

    #[tokio::test]
    async fn test_naks_when_publish_fails() {
        let emitter = Arc::new(RecordingEmitter::new().fail_on(OutputChannel::Packets));
        let response = consumer_service(emitter)
            .call(request("3.8", "false"))
            .await
            .unwrap();
        assert!(response.is_nak());
    }
}
