use crate::domain::{CayenneLppDecoder, DecodeError, PacketSchema, Result};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const JSON_FORMAT: &str = "json";
pub const CSV_FORMAT: &str = "csv";
pub const CAYENNE_LPP_FORMAT: &str = "cayenne_lpp";

/// Turns raw payload bytes into a JSON document whose keys are schema field names.
#[cfg_attr(test, mockall::automock)]
pub trait PacketDecoder: Send + Sync {
    fn format(&self) -> &'static str;

    fn decode(&self, bytes: &[u8], schema: &PacketSchema) -> Result<Value>;
}

/// Decoders keyed by format name. Built once at startup and shared by `Arc`.
#[derive(Default, Clone)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Arc<dyn PacketDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `json`, `csv` and `cayenne_lpp` decoders.
    pub fn standard() -> Self {
        Self::new()
            .with_decoder(Arc::new(JsonDecoder))
            .with_decoder(Arc::new(CsvDecoder))
            .with_decoder(Arc::new(CayenneLppDecoder::new()))
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn PacketDecoder>) -> Self {
        debug!(format = decoder.format(), "registering packet decoder");
        self.decoders.insert(decoder.format().to_string(), decoder);
        self
    }

    pub fn resolve(&self, format: &str) -> Result<&dyn PacketDecoder> {
        self.decoders
            .get(&format.to_ascii_lowercase())
            .map(|decoder| decoder.as_ref())
            .ok_or_else(|| DecodeError::UnknownFormat(format.to_string()))
    }

    pub fn formats(&self) -> Vec<&str> {
        let mut formats: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        formats.sort_unstable();
        formats
    }
}

/// Payload is already a JSON object keyed by field name.
pub struct JsonDecoder;

impl PacketDecoder for JsonDecoder {
    fn format(&self) -> &'static str {
        JSON_FORMAT
    }

    fn decode(&self, bytes: &[u8], _schema: &PacketSchema) -> Result<Value> {
        match serde_json::from_slice(bytes)? {
            Value::Object(map) => Ok(Value::Object(map)),
            other => Err(DecodeError::InvalidPayload(format!(
                "expected a JSON object, got {}",
                other
            ))),
        }
    }
}

/// Comma separated values. A two-line payload carries a header row; a
/// single line is matched positionally against the schema's top-level fields.
pub struct CsvDecoder;

impl PacketDecoder for CsvDecoder {
    fn format(&self) -> &'static str {
        CSV_FORMAT
    }

    fn decode(&self, bytes: &[u8], schema: &PacketSchema) -> Result<Value> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| DecodeError::InvalidPayload(format!("csv payload is not UTF-8: {}", e)))?;
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();

        let (names, row): (Vec<String>, &str) = match lines.as_slice() {
            [row] => (schema.fields.iter().map(|f| f.name.clone()).collect(), row),
            [header, row] => (split_row(header).map(str::to_string).collect(), row),
            _ => {
                return Err(DecodeError::InvalidPayload(format!(
                    "csv payload must have one or two lines, got {}",
                    lines.len()
                )))
            }
        };

        let values: Vec<&str> = split_row(row).collect();
        if values.len() > names.len() {
            return Err(DecodeError::InvalidPayload(format!(
                "csv row has {} values for {} columns",
                values.len(),
                names.len()
            )));
        }

        let document: Map<String, Value> = names
            .into_iter()
            .zip(values)
            .filter(|(_, raw)| !raw.is_empty())
            .map(|(name, raw)| (name, csv_value(raw)))
            .collect();
        Ok(Value::Object(document))
    }
}

fn split_row(row: &str) -> impl Iterator<Item = &str> {
    row.split(',').map(|cell| cell.trim().trim_matches('"'))
}

fn csv_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
