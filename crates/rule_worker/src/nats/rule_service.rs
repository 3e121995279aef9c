use crate::domain::{EvaluationOutcome, RuleEvaluationService};
use chrono::Utc;
use common::domain::{ErrorRecord, Packet};
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, warn};

/// Tower service feeding `packets.<projectId>` messages to the rule engine.
#[derive(Clone)]
pub struct RuleConsumerService {
    domain_service: Arc<RuleEvaluationService>,
}

impl RuleConsumerService {
    pub fn new(domain_service: Arc<RuleEvaluationService>) -> Self {
        Self { domain_service }
    }
}

impl Service<ConsumeRequest> for RuleConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let domain_service = Arc::clone(&self.domain_service);

        Box::pin(async move {
            let now = Utc::now().timestamp_millis();

            let packet = match Packet::decode(&req.payload) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(subject = %req.subject, error = %e, "undecodable packet");
                    let record = ErrorRecord::from_bytes(now, e.to_string(), &req.payload);
                    return Ok(match domain_service.record_error(record).await {
                        Ok(()) => ConsumeResponse::ack(),
                        Err(e) => ConsumeResponse::nak(e.to_string()),
                    });
                }
            };

            match domain_service.handle(packet, now).await {
                Ok(EvaluationOutcome::Completed) | Ok(EvaluationOutcome::Recorded) => {
                    debug!(subject = %req.subject, "evaluated packet");
                    Ok(ConsumeResponse::ack())
                }
                Ok(EvaluationOutcome::Retry(e)) => Ok(ConsumeResponse::nak(e.to_string())),
                Err(e) => {
                    warn!(subject = %req.subject, error = %e, "failed to record rule failure");
                    Ok(ConsumeResponse::nak(e.to_string()))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use common::domain::{
        ConversionStrategy, DomainError, FieldValue, OutboundMessage, OutputChannel, PacketField,
        StreamEmitter, TrafficTier,
    };
    use common::testing::RecordingEmitter;
    use common::{MockStreamEmitter, PipelineConfig};
    use mockall::Sequence;
    use std::collections::{BTreeMap, BTreeSet};

    fn consumer_service(emitter: Arc<dyn StreamEmitter>) -> RuleConsumerService {
        let config = PipelineConfig {
            project_id: 1,
            rule_sources: BTreeMap::from([(
                3,
                r#"{"id": 3, "name": "open", "condition": "open == true || level > 2.0"}"#
                    .to_string(),
            )]),
            event_rules: BTreeSet::from([3]),
            ..Default::default()
        };
        RuleConsumerService::new(Arc::new(
            RuleEvaluationService::open(&config, vec![], emitter).unwrap(),
        ))
    }

    fn request(fields: Vec<PacketField>) -> ConsumeRequest {
        let packet = Packet {
            id: 8,
            name: "door".to_string(),
            device_id: 3,
            project_id: 1,
            traffic_tier: TrafficTier::Low,
            timestamp_field: "timestamp".to_string(),
            fields,
            fired_rules: BTreeSet::new(),
        };
        ConsumeRequest::new(
            "packets.1".to_string(),
            Bytes::from(packet.encode().unwrap()),
            None,
        )
    }

    #[tokio::test]
    async fn test_acks_evaluated_packet() {
        let emitter = Arc::new(RecordingEmitter::new());
        let response = consumer_service(emitter.clone())
            .call(request(vec![PacketField::new(1, "open", FieldValue::Bool(true))]))
            .await
            .unwrap();

        assert!(response.is_ack());
        assert_eq!(emitter.count(OutputChannel::EventStore), 1);
    }

    #[tokio::test]
    async fn test_acks_packet_without_rule_variable() {
        let emitter = Arc::new(RecordingEmitter::new());
        let response = consumer_service(emitter.clone())
            .call(request(vec![PacketField::new(1, "closed", FieldValue::Bool(true))]))
            .await
            .unwrap();

        assert!(response.is_ack());
        assert_eq!(emitter.count(OutputChannel::Enriched), 1);
        assert_eq!(emitter.count(OutputChannel::EventStore), 0);
    }

    #[tokio::test]
    async fn test_naks_on_engine_failure() {
        let emitter = Arc::new(RecordingEmitter::new());
        let response = consumer_service(emitter.clone())
            .call(request(vec![
                PacketField::new(1, "open", FieldValue::Bool(false)),
                PacketField::new(2, "level", FieldValue::Text("high".to_string())),
            ]))
            .await
            .unwrap();

        assert!(response.is_nak());
        assert!(emitter.messages().is_empty());
    }

    #[tokio::test]
    async fn test_naks_when_error_sink_is_unreachable() {
        let mut emitter = MockStreamEmitter::new();
        let mut order = Sequence::new();
        emitter
            .expect_emit()
            .withf(|message: &OutboundMessage| message.channel == OutputChannel::Enriched)
            .times(1)
            .in_sequence(&mut order)
            .returning(|_| Err(DomainError::PublishError("no responders".to_string())));
        emitter
            .expect_emit()
            .withf(|message: &OutboundMessage| {
                message.channel == OutputChannel::Sink(ConversionStrategy::Error)
            })
            .times(1)
            .in_sequence(&mut order)
            .returning(|_| Err(DomainError::PublishError("no responders".to_string())));

        let response = consumer_service(Arc::new(emitter))
            .call(request(vec![PacketField::new(1, "open", FieldValue::Bool(true))]))
            .await
            .unwrap();

        assert!(response.is_nak());
    }

    #[tokio::test]
    async fn test_undecodable_packet_goes_to_error_sink() {
        let emitter = Arc::new(RecordingEmitter::new());
        let response = consumer_service(emitter.clone())
            .call(ConsumeRequest::new(
                "packets.1".to_string(),
                Bytes::from_static(b"not a packet"),
                None,
            ))
            .await
            .unwrap();

        assert!(response.is_ack());
        assert_eq!(
            emitter.count(OutputChannel::Sink(ConversionStrategy::Error)),
            1
        );
    }
}
