use crate::domain::PacketRouter;
use common::domain::{DomainResult, OutboundMessage, OutputChannel, SinkWrite, StreamEmitter};
use std::sync::Arc;
use tracing::{debug, instrument};

pub const ROUTER_SOURCE_ID: &str = "router";

/// Routes packets and publishes each resulting write to its sink channel.
pub struct RouterService {
    router: PacketRouter,
    emitter: Arc<dyn StreamEmitter>,
}

impl RouterService {
    pub fn new(router: PacketRouter, emitter: Arc<dyn StreamEmitter>) -> Self {
        Self { router, emitter }
    }

    /// Returns the number of writes published. Only a failed publish is an error.
    #[instrument(skip(self, payload), fields(project_id))]
    pub async fn handle(&self, project_id: u64, payload: &[u8], now_millis: i64) -> DomainResult<usize> {
        let writes = self.router.route(payload, now_millis);
        let count = writes.len();
        for write in writes {
            self.publish(project_id, write).await?;
        }
        debug!(count, "published storage writes");
        Ok(count)
    }

    async fn publish(&self, project_id: u64, write: SinkWrite) -> DomainResult<()> {
        let mut message = OutboundMessage::new(
            OutputChannel::Sink(write.strategy()),
            project_id,
            write.encode()?,
        )
        .with_source(ROUTER_SOURCE_ID);
        if let Some(key) = row_key(&write) {
            message = message.with_key(key);
        }
        self.emitter.emit(message).await
    }
}

fn row_key(write: &SinkWrite) -> Option<String> {
    match write {
        SinkWrite::TelemetryAvro { row_key, .. }
        | SinkWrite::Event { row_key, .. }
        | SinkWrite::Alarm { row_key, .. }
        | SinkWrite::Archive { row_key, .. } => Some(row_key.clone()),
        SinkWrite::Timeline { row_key_prefix, .. } => Some(row_key_prefix.clone()),
        SinkWrite::RuleState { rule_id, .. } => Some(rule_id.to_string()),
        SinkWrite::Error { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        ConversionStrategy, FieldValue, Packet, PacketField, TrafficTier,
    };
    use common::testing::RecordingEmitter;
    use std::collections::BTreeSet;

    fn telemetry_with_file() -> Vec<u8> {
        Packet {
            id: 7,
            name: "camera".to_string(),
            device_id: 1,
            project_id: 2,
            traffic_tier: TrafficTier::High,
            timestamp_field: "timestamp".to_string(),
            fields: vec![
                PacketField::new(1, "timestamp", FieldValue::Timestamp(1_000)),
                PacketField::new(2, "photo", FieldValue::File(vec![1, 2, 3])),
            ],
            fired_rules: BTreeSet::new(),
        }
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn test_high_tier_packet_with_file_publishes_every_write() {
        let emitter = Arc::new(RecordingEmitter::new());
        let service = RouterService::new(PacketRouter::new(), emitter.clone());

        let count = service.handle(2, &telemetry_with_file(), 5).await.unwrap();
        assert_eq!(count, 6);

        let column = emitter.on(OutputChannel::Sink(ConversionStrategy::Telemetry));
        assert_eq!(column.len(), 1);
        assert_eq!(column[0].subject(), "sink.telemetry-avro.2");
        assert_eq!(column[0].key.as_deref(), Some("HPACKET.7"));
        let SinkWrite::TelemetryAvro { attachments, .. } =
            SinkWrite::decode(&column[0].payload).unwrap()
        else {
            panic!("expected a telemetry write");
        };
        assert_eq!(attachments.len(), 1);

        let archives = emitter
            .messages()
            .iter()
            .filter(|m| matches!(m.channel, OutputChannel::Sink(s) if s.window().is_some()))
            .count();
        assert_eq!(archives, 4);
        assert_eq!(
            emitter.count(OutputChannel::Sink(ConversionStrategy::Timeline)),
            1
        );
    }

    #[tokio::test]
    async fn test_routing_failure_publishes_error_write() {
        let emitter = Arc::new(RecordingEmitter::new());
        let service = RouterService::new(PacketRouter::new(), emitter.clone());

        assert_eq!(service.handle(2, b"garbage", 5).await.unwrap(), 1);
        assert_eq!(emitter.on(OutputChannel::Sink(ConversionStrategy::Error))[0].subject(), "sink.error.2");
    }

    #[tokio::test]
    async fn test_publish_failure_is_returned() {
        let emitter = Arc::new(
            RecordingEmitter::new().fail_on(OutputChannel::Sink(ConversionStrategy::HdfsYear)),
        );
        let service = RouterService::new(PacketRouter::new(), emitter);
        assert!(service.handle(2, &telemetry_with_file(), 5).await.is_err());
    }
}
