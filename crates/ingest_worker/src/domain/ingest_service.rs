use crate::domain::{DeserializeOutcome, IngestInput, PacketDeserializer};
use common::domain::{
    ConversionStrategy, DomainResult, ErrorRecord, OutboundMessage, OutputChannel, Packet,
    StreamEmitter,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

pub const INGEST_SOURCE_ID: &str = "deserializer";

/// Runs the deserializer and publishes its outcome.
///
/// Packets go to `packets.<projectId>`, heartbeats to `heartbeat.<projectId>`
/// and decode failures to the error sink. Only a failed publish is returned as
/// an error, so the caller can have the input redelivered.
pub struct IngestService {
    deserializer: Arc<PacketDeserializer>,
    emitter: Arc<dyn StreamEmitter>,
}

impl IngestService {
    pub fn new(deserializer: Arc<PacketDeserializer>, emitter: Arc<dyn StreamEmitter>) -> Self {
        Self {
            deserializer,
            emitter,
        }
    }

    #[instrument(skip(self, input), fields(tick = matches!(input, IngestInput::Tick)))]
    pub async fn handle(&self, input: IngestInput, now_millis: i64) -> DomainResult<()> {
        let original = match &input {
            IngestInput::Message { payload, .. } => payload.clone(),
            IngestInput::Tick => Vec::new(),
        };

        match self.deserializer.process(input, now_millis) {
            DeserializeOutcome::Packet(packet) => {
                self.publish_packet(OutputChannel::Packets, packet, &original, now_millis)
                    .await
            }
            DeserializeOutcome::Heartbeat(packet) => {
                self.publish_packet(OutputChannel::Heartbeat, packet, &original, now_millis)
                    .await
            }
            DeserializeOutcome::Dropped => Ok(()),
            DeserializeOutcome::Failed(record) => self.publish_error(record).await,
        }
    }

    async fn publish_packet(
        &self,
        channel: OutputChannel,
        packet: Packet,
        original: &[u8],
        now_millis: i64,
    ) -> DomainResult<()> {
        let payload = match packet.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(packet_id = packet.id, error = %e, "failed to encode packet");
                return self
                    .publish_error(ErrorRecord::from_bytes(now_millis, e.to_string(), original))
                    .await;
            }
        };

        let key = format!("{}.{}", packet.device_id, packet.id);
        self.emitter
            .emit(
                OutboundMessage::new(channel, packet.project_id, payload)
                    .with_key(key)
                    .with_source(INGEST_SOURCE_ID),
            )
            .await?;

        debug!(packet_id = packet.id, channel = %channel, "published packet");
        Ok(())
    }

    async fn publish_error(&self, record: ErrorRecord) -> DomainResult<()> {
        let write = record.into_write();
        let payload = write.encode()?;
        self.emitter
            .emit(
                OutboundMessage::new(
                    OutputChannel::Sink(ConversionStrategy::Error),
                    self.deserializer.project_id(),
                    payload,
                )
                .with_source(INGEST_SOURCE_ID),
            )
            .await
    }
}
