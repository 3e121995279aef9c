use crate::domain::{encoding, DomainError, DomainResult, TrafficTier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const EVENT_SUFFIX: &str = "_event";
pub const ALARM_EVENT_SUFFIX: &str = "_alarm_event";
pub const HEARTBEAT_PACKET_NAME: &str = "heartbeat";

/// Storage model a packet belongs to, derived from its name and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Telemetry,
    Event,
    AlarmEvent,
}

/// Value of a packet field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Object(Vec<PacketField>),
    /// Binary content. Only ever present on in-flight packets.
    #[serde(with = "encoding::base64_bytes")]
    File(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketField {
    pub id: u64,
    pub name: String,
    pub value: FieldValue,
}

impl PacketField {
    pub fn new(id: u64, name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            id,
            name: name.into(),
            value,
        }
    }
}

/// Decoded unit of telemetry, event or alarm data flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub id: u64,
    pub name: String,
    pub device_id: u64,
    pub project_id: u64,
    #[serde(default)]
    pub traffic_tier: TrafficTier,
    pub timestamp_field: String,
    pub fields: Vec<PacketField>,
    #[serde(default)]
    pub fired_rules: BTreeSet<u64>,
}

impl Packet {
    /// Synthetic liveness packet emitted on every heartbeat tick.
    pub fn heartbeat(project_id: u64, at_millis: i64) -> Self {
        Self {
            id: 0,
            name: HEARTBEAT_PACKET_NAME.to_string(),
            device_id: 0,
            project_id,
            traffic_tier: TrafficTier::Low,
            timestamp_field: "timestamp".to_string(),
            fields: vec![PacketField::new(
                1,
                "timestamp",
                FieldValue::Timestamp(at_millis),
            )],
            fired_rules: BTreeSet::new(),
        }
    }

    pub fn model_kind(&self) -> DomainResult<ModelKind> {
        if self.name.ends_with(ALARM_EVENT_SUFFIX) {
            Ok(ModelKind::AlarmEvent)
        } else if self.name.ends_with(EVENT_SUFFIX) {
            Ok(ModelKind::Event)
        } else if self.id == 0 {
            Err(DomainError::UnclassifiablePacket(format!(
                "packet '{}' has id 0 and no event suffix",
                self.name
            )))
        } else {
            Ok(ModelKind::Telemetry)
        }
    }

    /// Depth-first lookup of a field by name.
    pub fn field(&self, name: &str) -> Option<&PacketField> {
        find_field(&self.fields, name)
    }

    /// Milliseconds of the designated timestamp field.
    pub fn timestamp(&self) -> DomainResult<i64> {
        match self.field(&self.timestamp_field).map(|f| &f.value) {
            Some(FieldValue::Timestamp(millis)) | Some(FieldValue::Integer(millis)) => Ok(*millis),
            _ => Err(DomainError::MissingTimestamp(
                self.id,
                self.timestamp_field.clone(),
            )),
        }
    }

    /// Inserts the timestamp field at top level when the payload did not carry one.
    ///
    /// Null placeholders of the field are dropped at any depth. A field of that
    /// name holding anything else is an error.
    pub fn ensure_timestamp(&mut self, received_at_millis: i64) -> DomainResult<()> {
        if self.timestamp().is_ok() {
            return Ok(());
        }
        let name = self.timestamp_field.clone();
        remove_null_fields(&mut self.fields, &name);
        if find_field(&self.fields, &name).is_some() {
            return Err(DomainError::InvalidTimestamp(self.id, name));
        }

        let next_id = max_field_id(&self.fields) + 1;
        self.fields.push(PacketField::new(
            next_id,
            name,
            FieldValue::Timestamp(received_at_millis),
        ));
        Ok(())
    }

    pub fn has_fields(&self) -> bool {
        self.fields
            .iter()
            .any(|f| !matches!(f.value, FieldValue::Null))
    }

    /// Moves every binary field into a map keyed by field id, leaving `Null` in the tree.
    pub fn extract_attachments(&mut self) -> BTreeMap<u64, Vec<u8>> {
        let mut attachments = BTreeMap::new();
        extract_files(&mut self.fields, &mut attachments);
        attachments
    }

    /// Storage wire form. Refuses packets that still carry binary content.
    pub fn to_wire(&self) -> DomainResult<String> {
        if let Some(name) = first_file(&self.fields) {
            return Err(DomainError::BinaryFieldInWireForm(self.id, name.to_string()));
        }
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_wire(wire: &str) -> DomainResult<Self> {
        Ok(serde_json::from_str(wire)?)
    }

    /// Transport form used between stages; binary fields travel base64-encoded.
    pub fn encode(&self) -> DomainResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> DomainResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| DomainError::InvalidPacket(format!("undecodable packet: {}", e)))
    }

    /// Field tree as a plain JSON object keyed by field name. Binary fields
    /// render as `null`; their content travels only as attachments.
    pub fn fields_json(&self) -> serde_json::Value {
        serde_json::Value::Object(fields_to_json(&self.fields))
    }
}

fn find_field<'a>(fields: &'a [PacketField], name: &str) -> Option<&'a PacketField> {
    for field in fields {
        if field.name == name {
            return Some(field);
        }
        if let FieldValue::Object(inner) = &field.value {
            if let Some(found) = find_field(inner, name) {
                return Some(found);
            }
        }
    }
    None
}

fn remove_null_fields(fields: &mut Vec<PacketField>, name: &str) {
    fields.retain(|f| !(f.name == name && matches!(f.value, FieldValue::Null)));
    for field in fields.iter_mut() {
        if let FieldValue::Object(inner) = &mut field.value {
            remove_null_fields(inner, name);
        }
    }
}

fn max_field_id(fields: &[PacketField]) -> u64 {
    fields
        .iter()
        .map(|f| match &f.value {
            FieldValue::Object(inner) => f.id.max(max_field_id(inner)),
            _ => f.id,
        })
        .max()
        .unwrap_or(0)
}

fn extract_files(fields: &mut [PacketField], out: &mut BTreeMap<u64, Vec<u8>>) {
    for field in fields.iter_mut() {
        match &mut field.value {
            FieldValue::File(bytes) => {
                out.insert(field.id, std::mem::take(bytes));
                field.value = FieldValue::Null;
            }
            FieldValue::Object(inner) => extract_files(inner, out),
            _ => {}
        }
    }
}

fn first_file(fields: &[PacketField]) -> Option<&str> {
    fields.iter().find_map(|f| match &f.value {
        FieldValue::File(_) => Some(f.name.as_str()),
        FieldValue::Object(inner) => first_file(inner),
        _ => None,
    })
}

fn fields_to_json(fields: &[PacketField]) -> serde_json::Map<String, serde_json::Value> {
    fields
        .iter()
        .map(|f| (f.name.clone(), value_to_json(&f.value)))
        .collect()
}

fn value_to_json(value: &FieldValue) -> serde_json::Value {
    use serde_json::Value;
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(b) => Value::Bool(*b),
        FieldValue::Integer(i) | FieldValue::Timestamp(i) => Value::from(*i),
        FieldValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        FieldValue::Text(s) => Value::String(s.clone()),
        FieldValue::Object(inner) => Value::Object(fields_to_json(inner)),
        FieldValue::File(_) => Value::Null,
    }
}
