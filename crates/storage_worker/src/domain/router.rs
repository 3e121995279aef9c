//! Classification and fan-out of packets into storage writes.
//!
//! | kind        | column write    | archive writes        | timeline |
//! |-------------|-----------------|-----------------------|----------|
//! | TELEMETRY   | `TelemetryAvro` | one per tier window   | yes      |
//! | EVENT       | `Event`         | none                  | no       |
//! | ALARM_EVENT | `Alarm`         | none                  | no       |

use common::domain::{
    AlarmState, DomainError, DomainResult, ErrorRecord, FieldValue, ModelKind, Packet, SinkWrite,
    StorageKey, ALARM_STATE_FIELD, DEVICE_ID_FIELD, RULE_ID_FIELD,
};
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct PacketRouter;

impl PacketRouter {
    pub fn new() -> Self {
        Self
    }

    /// Routes a transport-form packet. Never fails: any problem becomes a
    /// single error-sink write carrying the original payload.
    pub fn route(&self, payload: &[u8], now_millis: i64) -> Vec<SinkWrite> {
        match Packet::decode(payload).and_then(|packet| self.route_packet(packet)) {
            Ok(writes) => writes,
            Err(e) => {
                warn!(error = %e, "failed to route packet, redirecting to error sink");
                vec![ErrorRecord::from_bytes(now_millis, e.to_string(), payload).into_write()]
            }
        }
    }

    pub fn route_packet(&self, mut packet: Packet) -> DomainResult<Vec<SinkWrite>> {
        let kind = packet.model_kind()?;
        let timestamp = packet.timestamp()?;
        let row_key = StorageKey::for_packet(&packet)?.into_string();

        let writes = match kind {
            ModelKind::Telemetry => {
                let attachments = packet.extract_attachments();
                let payload = packet.to_wire()?;

                let mut writes = Vec::with_capacity(6);
                writes.push(SinkWrite::TelemetryAvro {
                    row_key: row_key.clone(),
                    timestamp,
                    payload: payload.clone(),
                    attachments,
                });
                for window in packet.traffic_tier.retention_windows() {
                    writes.push(SinkWrite::Archive {
                        window,
                        bucket: window.bucket(timestamp),
                        row_key: row_key.clone(),
                        timestamp,
                        payload: payload.clone(),
                    });
                }
                writes.push(SinkWrite::Timeline {
                    row_key_prefix: row_key,
                    timestamp,
                    step: packet.traffic_tier.timeline_step(),
                });
                writes
            }
            ModelKind::Event => vec![SinkWrite::Event {
                row_key,
                rule_id: integer_field(&packet, RULE_ID_FIELD)? as u64,
                timestamp,
                payload: packet.to_wire()?,
            }],
            ModelKind::AlarmEvent => vec![SinkWrite::Alarm {
                row_key,
                device_id: integer_field(&packet, DEVICE_ID_FIELD)? as u64,
                timestamp,
                alarm_state: alarm_state(&packet)?,
                payload: packet.to_wire()?,
            }],
        };

        debug!(
            packet_id = packet.id,
            kind = ?kind,
            writes = writes.len(),
            "routed packet"
        );
        Ok(writes)
    }
}

fn integer_field(packet: &Packet, name: &str) -> DomainResult<i64> {
    match packet.field(name).map(|f| &f.value) {
        Some(FieldValue::Integer(v)) => Ok(*v),
        _ => Err(DomainError::InvalidPacket(format!(
            "'{}' has no integer field '{}'",
            packet.name, name
        ))),
    }
}

fn alarm_state(packet: &Packet) -> DomainResult<AlarmState> {
    match packet.field(ALARM_STATE_FIELD).map(|f| &f.value) {
        Some(FieldValue::Text(state)) => state
            .parse()
            .map_err(|e: String| DomainError::InvalidPacket(e)),
        _ => Err(DomainError::InvalidPacket(format!(
            "'{}' has no alarm state",
            packet.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{ConversionStrategy, PacketField, RetentionWindow, TrafficTier};
    use std::collections::BTreeSet;

    const TS: i64 = 1_717_243_200_000; // 2024-06-01T12:00:00Z

    fn telemetry(tier: TrafficTier) -> Packet {
        Packet {
            id: 7,
            name: "weather".to_string(),
            device_id: 3,
            project_id: 1,
            traffic_tier: tier,
            timestamp_field: "timestamp".to_string(),
            fields: vec![
                PacketField::new(1, "temperature", FieldValue::Float(20.0)),
                PacketField::new(2, "timestamp", FieldValue::Timestamp(TS)),
                PacketField::new(
                    3,
                    "camera",
                    FieldValue::Object(vec![PacketField::new(
                        4,
                        "photo",
                        FieldValue::File(vec![9, 8, 7]),
                    )]),
                ),
            ],
            fired_rules: BTreeSet::new(),
        }
    }

    fn strategies(writes: &[SinkWrite]) -> Vec<ConversionStrategy> {
        writes.iter().map(SinkWrite::strategy).collect()
    }

    #[test]
    fn test_high_tier_telemetry_fan_out() {
        let writes = PacketRouter::new()
            .route_packet(telemetry(TrafficTier::High))
            .unwrap();

        assert_eq!(
            strategies(&writes),
            vec![
                ConversionStrategy::Telemetry,
                ConversionStrategy::HdfsYear,
                ConversionStrategy::HdfsDay,
                ConversionStrategy::HdfsQuarter,
                ConversionStrategy::HdfsSemester,
                ConversionStrategy::Timeline,
            ]
        );

        let SinkWrite::TelemetryAvro {
            row_key,
            payload,
            attachments,
            ..
        } = &writes[0]
        else {
            panic!("expected the column write first");
        };
        assert_eq!(row_key, "HPACKET.7");
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[&4], vec![9, 8, 7]);
        let stored = Packet::from_wire(payload).unwrap();
        assert_eq!(stored.field("photo").unwrap().value, FieldValue::Null);

        let SinkWrite::Archive { bucket, .. } = &writes[3] else {
            panic!("expected an archive write");
        };
        assert_eq!(bucket, "2024/Q2");

        assert_eq!(
            writes[5],
            SinkWrite::Timeline {
                row_key_prefix: "HPACKET.7".to_string(),
                timestamp: TS,
                step: RetentionWindow::Day,
            }
        );
    }

    #[test]
    fn test_tier_windows() {
        let router = PacketRouter::new();
        let archives = |tier| {
            router
                .route_packet(telemetry(tier))
                .unwrap()
                .iter()
                .filter_map(|w| w.strategy().window())
                .collect::<Vec<_>>()
        };
        assert_eq!(archives(TrafficTier::Low), vec![RetentionWindow::Year]);
        assert_eq!(
            archives(TrafficTier::Medium),
            vec![RetentionWindow::Year, RetentionWindow::Month]
        );
        assert_eq!(
            archives(TrafficTier::Intensive),
            vec![
                RetentionWindow::Year,
                RetentionWindow::Hour,
                RetentionWindow::Quarter,
                RetentionWindow::Semester
            ]
        );
    }

    #[test]
    fn test_event_routing() {
        let packet = Packet {
            id: 0,
            name: "hot_event".to_string(),
            device_id: 3,
            project_id: 1,
            traffic_tier: TrafficTier::High,
            timestamp_field: "timestamp".to_string(),
            fields: vec![
                PacketField::new(1, RULE_ID_FIELD, FieldValue::Integer(12)),
                PacketField::new(2, "timestamp", FieldValue::Timestamp(TS)),
                PacketField::new(3, "payload", FieldValue::Text("{}".to_string())),
            ],
            fired_rules: BTreeSet::new(),
        };
        let writes = PacketRouter::new().route_packet(packet).unwrap();
        assert_eq!(writes.len(), 1);
        let SinkWrite::Event {
            row_key, rule_id, ..
        } = &writes[0]
        else {
            panic!("expected an event write");
        };
        assert_eq!(row_key, &format!("{}_12", TS));
        assert_eq!(*rule_id, 12);
    }

    #[test]
    fn test_alarm_routing() {
        let packet = Packet {
            id: 0,
            name: "cold_alarm_event".to_string(),
            device_id: 3,
            project_id: 1,
            traffic_tier: TrafficTier::Low,
            timestamp_field: "timestamp".to_string(),
            fields: vec![
                PacketField::new(1, RULE_ID_FIELD, FieldValue::Integer(8)),
                PacketField::new(2, "timestamp", FieldValue::Timestamp(TS)),
                PacketField::new(3, DEVICE_ID_FIELD, FieldValue::Integer(3)),
                PacketField::new(4, ALARM_STATE_FIELD, FieldValue::Text("UP".to_string())),
            ],
            fired_rules: BTreeSet::new(),
        };
        let writes = PacketRouter::new().route_packet(packet).unwrap();
        assert_eq!(strategies(&writes), vec![ConversionStrategy::Alarm]);
        let SinkWrite::Alarm {
            row_key,
            alarm_state,
            ..
        } = &writes[0]
        else {
            panic!("expected an alarm write");
        };
        assert_eq!(row_key, "Alarm.3");
        assert_eq!(*alarm_state, AlarmState::Up);
    }

    #[test]
    fn test_unclassifiable_packet_goes_to_error_sink() {
        let mut packet = telemetry(TrafficTier::Low);
        packet.id = 0;
        let payload = packet.encode().unwrap();

        let writes = PacketRouter::new().route(&payload, 99);
        assert_eq!(writes.len(), 1);
        let SinkWrite::Error {
            timestamp,
            original_payload,
            ..
        } = &writes[0]
        else {
            panic!("expected an error write");
        };
        assert_eq!(*timestamp, 99);
        assert_eq!(original_payload.as_bytes(), payload.as_slice());
    }

    #[test]
    fn test_missing_timestamp_goes_to_error_sink() {
        let mut packet = telemetry(TrafficTier::Low);
        packet.timestamp_field = "receivedAt".to_string();
        let writes = PacketRouter::new().route(&packet.encode().unwrap(), 5);
        assert_eq!(strategies(&writes), vec![ConversionStrategy::Error]);
    }

    #[test]
    fn test_undecodable_payload_goes_to_error_sink() {
        let writes = PacketRouter::new().route(b"garbage", 5);
        assert_eq!(strategies(&writes), vec![ConversionStrategy::Error]);
    }
}
