use crate::domain::{DomainError, DomainResult, FieldValue, ModelKind, Packet};
use std::fmt;

pub const TELEMETRY_KEY_PREFIX: &str = "HPACKET";
pub const ALARM_KEY_PREFIX: &str = "Alarm";

/// Field names carried by derived event and alarm packets.
pub const RULE_ID_FIELD: &str = "ruleId";
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const DEVICE_ID_FIELD: &str = "deviceId";
pub const ALARM_ID_FIELD: &str = "alarmId";
pub const ALARM_STATE_FIELD: &str = "alarmState";
pub const PAYLOAD_FIELD: &str = "payload";

/// Row identifier in the column store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn telemetry(packet_id: u64) -> Self {
        Self(format!("{}.{}", TELEMETRY_KEY_PREFIX, packet_id))
    }

    pub fn event(timestamp_millis: i64, rule_id: u64) -> Self {
        Self(format!("{}_{}", timestamp_millis, rule_id))
    }

    pub fn alarm(device_id: u64) -> Self {
        Self(format!("{}.{}", ALARM_KEY_PREFIX, device_id))
    }

    pub fn rule_state(rule_id: u64) -> Self {
        Self(rule_id.to_string())
    }

    /// Key for a packet, a pure function of its model kind and fields.
    pub fn for_packet(packet: &Packet) -> DomainResult<Self> {
        match packet.model_kind()? {
            ModelKind::Telemetry => Ok(Self::telemetry(packet.id)),
            ModelKind::Event => Ok(Self::event(
                integer_field(packet, TIMESTAMP_FIELD)?,
                integer_field(packet, RULE_ID_FIELD)? as u64,
            )),
            ModelKind::AlarmEvent => Ok(Self::alarm(
                integer_field(packet, DEVICE_ID_FIELD)? as u64,
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn integer_field(packet: &Packet, name: &str) -> DomainResult<i64> {
    match packet.field(name).map(|f| &f.value) {
        Some(FieldValue::Integer(v)) | Some(FieldValue::Timestamp(v)) => Ok(*v),
        _ => Err(DomainError::InvalidPacket(format!(
            "packet '{}' has no integer field '{}'",
            packet.name, name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PacketField, TrafficTier};
    use std::collections::BTreeSet;

    fn packet(id: u64, name: &str, fields: Vec<PacketField>) -> Packet {
        Packet {
            id,
            name: name.to_string(),
            device_id: 11,
            project_id: 1,
            traffic_tier: TrafficTier::Low,
            timestamp_field: TIMESTAMP_FIELD.to_string(),
            fields,
            fired_rules: BTreeSet::new(),
        }
    }

    #[test]
    fn test_telemetry_key() {
        let p = packet(
            9,
            "weather",
            vec![PacketField::new(1, "timestamp", FieldValue::Timestamp(5))],
        );
        assert_eq!(StorageKey::for_packet(&p).unwrap().as_str(), "HPACKET.9");
    }

    #[test]
    fn test_event_key() {
        let p = packet(
            0,
            "overheat_event",
            vec![
                PacketField::new(1, RULE_ID_FIELD, FieldValue::Integer(12)),
                PacketField::new(2, TIMESTAMP_FIELD, FieldValue::Timestamp(1_700_000_000_123)),
            ],
        );
        assert_eq!(
            StorageKey::for_packet(&p).unwrap().as_str(),
            "1700000000123_12"
        );
    }

    #[test]
    fn test_alarm_key() {
        let p = packet(
            0,
            "overheat_alarm_event",
            vec![PacketField::new(1, DEVICE_ID_FIELD, FieldValue::Integer(11))],
        );
        assert_eq!(StorageKey::for_packet(&p).unwrap().as_str(), "Alarm.11");
    }

    #[test]
    fn test_key_is_pure() {
        let p = packet(
            4,
            "weather",
            vec![PacketField::new(1, "timestamp", FieldValue::Timestamp(5))],
        );
        assert_eq!(
            StorageKey::for_packet(&p).unwrap(),
            StorageKey::for_packet(&p.clone()).unwrap()
        );
    }

    #[test]
    fn test_event_key_without_rule_id_fails() {
        let p = packet(0, "overheat_event", vec![]);
        assert!(StorageKey::for_packet(&p).is_err());
    }

    #[test]
    fn test_rule_state_key() {
        assert_eq!(StorageKey::rule_state(33).as_str(), "33");
    }
}
