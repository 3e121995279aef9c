use crate::domain::{DecodeError, DecoderRegistry, PacketSchema, Result};
use common::domain::{
    encoding, project_id_from_subject, ErrorRecord, Packet, RoutingKey,
};
use common::PipelineConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Input of the deserializer: a transport message or a heartbeat tick.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestInput {
    Message {
        /// `streaming.<projectId>`
        subject: String,
        /// `<deviceId>.<packetId>`
        key: Option<String>,
        /// Base64 text of the device payload
        payload: Vec<u8>,
    },
    Tick,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeserializeOutcome {
    Packet(Packet),
    Heartbeat(Packet),
    /// No schema for the packet id: not a configured channel
    Dropped,
    Failed(ErrorRecord),
}

/// Decodes transport messages into packets using the configured schemas.
pub struct PacketDeserializer {
    project_id: u64,
    schemas: BTreeMap<u64, PacketSchema>,
    registry: Arc<DecoderRegistry>,
}

impl PacketDeserializer {
    /// Parses every configured schema. A malformed schema stops the stage from starting.
    pub fn new(config: &PipelineConfig, registry: Arc<DecoderRegistry>) -> Result<Self> {
        let schemas = config
            .packet_schemas
            .iter()
            .map(|(packet_id, raw)| {
                let schema = PacketSchema::parse(raw).map_err(|e| {
                    DecodeError::InvalidSchema(format!("packet.{}: {}", packet_id, e))
                })?;
                Ok((*packet_id, schema))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        debug!(
            project_id = config.project_id,
            schemas = schemas.len(),
            formats = ?registry.formats(),
            "initialized packet deserializer"
        );

        Ok(Self {
            project_id: config.project_id,
            schemas,
            registry,
        })
    }

    pub fn project_id(&self) -> u64 {
        self.project_id
    }

    pub fn process(&self, input: IngestInput, now_millis: i64) -> DeserializeOutcome {
        match input {
            IngestInput::Tick => {
                DeserializeOutcome::Heartbeat(Packet::heartbeat(self.project_id, now_millis))
            }
            IngestInput::Message {
                subject,
                key,
                payload,
            } => match self.decode(&subject, key.as_deref(), &payload, now_millis) {
                Ok(Some(packet)) => DeserializeOutcome::Packet(packet),
                Ok(None) => DeserializeOutcome::Dropped,
                Err(e) => {
                    warn!(subject = %subject, key = ?key, error = %e, "failed to decode packet");
                    DeserializeOutcome::Failed(ErrorRecord::from_bytes(
                        now_millis,
                        e.to_string(),
                        &payload,
                    ))
                }
            },
        }
    }

    fn decode(
        &self,
        subject: &str,
        key: Option<&str>,
        payload: &[u8],
        now_millis: i64,
    ) -> std::result::Result<Option<Packet>, String> {
        let project_id = project_id_from_subject(subject).map_err(|e| e.to_string())?;
        let key = key.ok_or_else(|| "message has no routing key".to_string())?;
        let routing = RoutingKey::parse(key).map_err(|e| e.to_string())?;

        let Some(schema) = self.schemas.get(&routing.packet_id) else {
            debug!(packet_id = routing.packet_id, "no schema for packet, dropping");
            return Ok(None);
        };

        self.decode_with(schema, routing, project_id, payload, now_millis)
            .map(Some)
            .map_err(|e| e.to_string())
    }

    fn decode_with(
        &self,
        schema: &PacketSchema,
        routing: RoutingKey,
        project_id: u64,
        payload: &[u8],
        now_millis: i64,
    ) -> Result<Packet> {
        let decoder = self.registry.resolve(&schema.format)?;
        let text = String::from_utf8_lossy(payload);
        let raw = encoding::decode(text.trim())?;
        let document = decoder.decode(&raw, schema)?;

        let mut packet = schema.build_packet(&document, routing.device_id, project_id)?;
        if !packet.has_fields() {
            return Err(DecodeError::EmptyPacket(packet.id));
        }
        packet.ensure_timestamp(now_millis)?;

        debug!(
            packet_id = packet.id,
            device_id = packet.device_id,
            format = decoder.format(),
            "decoded packet"
        );
        Ok(packet)
    }
}
