use crate::domain::{DecodeError, Result};
use chrono::DateTime;
use common::domain::{encoding, FieldValue, Packet, PacketField, TrafficTier};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

fn default_timestamp_field() -> String {
    "timestamp".to_string()
}

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    #[serde(alias = "BOOL")]
    Boolean,
    #[serde(alias = "LONG", alias = "INT")]
    Integer,
    #[serde(alias = "DOUBLE")]
    Float,
    #[serde(alias = "STRING")]
    Text,
    #[serde(alias = "DATE")]
    Timestamp,
    Object,
    File,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldSchema {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Children of an `OBJECT` field
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

/// Schema descriptor stored under `packet.<packetId>`.
///
/// ```json
/// {"id": 12, "name": "weather", "format": "json", "trafficPlan": "HIGH",
///  "timestampField": "timestamp",
///  "fields": [{"id": 1, "name": "temperature", "type": "FLOAT"}]}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketSchema {
    pub id: u64,
    pub name: String,
    pub format: String,
    #[serde(default)]
    pub traffic_plan: TrafficTier,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    pub fields: Vec<FieldSchema>,
}

impl PacketSchema {
    pub fn parse(raw: &str) -> Result<Self> {
        let schema: PacketSchema =
            serde_json::from_str(raw).map_err(|e| DecodeError::InvalidSchema(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        validate_ids(&self.fields, &mut seen)
    }

    /// Builds a packet from a decoded document. Fields absent from the document stay `Null`.
    pub fn build_packet(&self, document: &Value, device_id: u64, project_id: u64) -> Result<Packet> {
        let fields = build_fields(&self.fields, document)?;
        Ok(Packet {
            id: self.id,
            name: self.name.clone(),
            device_id,
            project_id,
            traffic_tier: self.traffic_plan,
            timestamp_field: self.timestamp_field.clone(),
            fields,
            fired_rules: BTreeSet::new(),
        })
    }
}

fn validate_ids(fields: &[FieldSchema], seen: &mut BTreeSet<u64>) -> Result<()> {
    for field in fields {
        if !seen.insert(field.id) {
            return Err(DecodeError::InvalidSchema(format!(
                "duplicate field id {}",
                field.id
            )));
        }
        if field.kind != FieldKind::Object && !field.fields.is_empty() {
            return Err(DecodeError::InvalidSchema(format!(
                "field '{}' declares children but is not an OBJECT",
                field.name
            )));
        }
        validate_ids(&field.fields, seen)?;
    }
    Ok(())
}

fn build_fields(schema: &[FieldSchema], document: &Value) -> Result<Vec<PacketField>> {
    schema
        .iter()
        .map(|field| {
            let value = match document.get(&field.name) {
                None | Some(Value::Null) => FieldValue::Null,
                Some(raw) => convert(field, raw)?,
            };
            Ok(PacketField::new(field.id, field.name.clone(), value))
        })
        .collect()
}

fn convert(field: &FieldSchema, raw: &Value) -> Result<FieldValue> {
    let mismatch = |expected| DecodeError::FieldType {
        field: field.name.clone(),
        expected,
    };

    let value = match field.kind {
        FieldKind::Boolean => match raw {
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::String(s) => FieldValue::Bool(s.parse().map_err(|_| mismatch("boolean"))?),
            _ => return Err(mismatch("boolean")),
        },
        FieldKind::Integer => match raw {
            Value::Number(n) => FieldValue::Integer(n.as_i64().ok_or_else(|| mismatch("integer"))?),
            Value::String(s) => FieldValue::Integer(s.trim().parse().map_err(|_| mismatch("integer"))?),
            _ => return Err(mismatch("integer")),
        },
        FieldKind::Float => match raw {
            Value::Number(n) => FieldValue::Float(n.as_f64().ok_or_else(|| mismatch("float"))?),
            Value::String(s) => FieldValue::Float(s.trim().parse().map_err(|_| mismatch("float"))?),
            _ => return Err(mismatch("float")),
        },
        FieldKind::Text => match raw {
            Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        },
        FieldKind::Timestamp => match raw {
            Value::Number(n) => FieldValue::Timestamp(n.as_i64().ok_or_else(|| mismatch("timestamp"))?),
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(millis) => FieldValue::Timestamp(millis),
                Err(_) => FieldValue::Timestamp(
                    DateTime::parse_from_rfc3339(s.trim())
                        .map_err(|_| mismatch("timestamp"))?
                        .timestamp_millis(),
                ),
            },
            _ => return Err(mismatch("timestamp")),
        },
        FieldKind::Object => match raw {
            Value::Object(_) => FieldValue::Object(build_fields(&field.fields, raw)?),
            _ => return Err(mismatch("object")),
        },
        FieldKind::File => match raw {
            Value::String(s) => FieldValue::File(encoding::decode(s.trim()).map_err(|_| mismatch("base64 file"))?),
            _ => return Err(mismatch("base64 file")),
        },
    };
    Ok(value)
}
