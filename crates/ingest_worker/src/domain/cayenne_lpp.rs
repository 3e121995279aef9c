//! Cayenne LPP (Low Power Payload) decoder.
//!
//! Each reading is `channel (1 byte) | type (1 byte) | data (N bytes)`; readings
//! are concatenated. Decoded readings are keyed `<type name>_<channel>`, so a
//! schema field named `temperature_1` picks up the temperature on channel 1.
//!
//! Supported types: digital in/out, analog in/out, illuminance, presence,
//! temperature, humidity, accelerometer, barometer, gyrometer, GPS, plus the
//! extended generic sensor, voltage, current, percentage, unix time and switch.

use crate::domain::{DecodeError, PacketDecoder, PacketSchema, Result, CAYENNE_LPP_FORMAT};
use chrono::DateTime;
use serde_json::{json, Map, Value};

pub const TYPE_DIGITAL_INPUT: u8 = 0;
pub const TYPE_DIGITAL_OUTPUT: u8 = 1;
pub const TYPE_ANALOG_INPUT: u8 = 2;
pub const TYPE_ANALOG_OUTPUT: u8 = 3;
pub const TYPE_GENERIC_SENSOR: u8 = 100;
pub const TYPE_ILLUMINANCE: u8 = 101;
pub const TYPE_PRESENCE: u8 = 102;
pub const TYPE_TEMPERATURE: u8 = 103;
pub const TYPE_HUMIDITY: u8 = 104;
pub const TYPE_ACCELEROMETER: u8 = 113;
pub const TYPE_BAROMETER: u8 = 115;
pub const TYPE_VOLTAGE: u8 = 116;
pub const TYPE_CURRENT: u8 = 117;
pub const TYPE_PERCENTAGE: u8 = 120;
pub const TYPE_UNIX_TIME: u8 = 133;
pub const TYPE_GYROMETER: u8 = 134;
pub const TYPE_GPS: u8 = 136;
pub const TYPE_SWITCH: u8 = 142;

pub struct CayenneLppDecoder;

impl CayenneLppDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Name and data size of a sensor type.
    fn describe(type_id: u8) -> Result<(&'static str, usize)> {
        let described = match type_id {
            TYPE_DIGITAL_INPUT => ("digital_input", 1),
            TYPE_DIGITAL_OUTPUT => ("digital_output", 1),
            TYPE_ANALOG_INPUT => ("analog_input", 2),
            TYPE_ANALOG_OUTPUT => ("analog_output", 2),
            TYPE_GENERIC_SENSOR => ("generic_sensor", 4),
            TYPE_ILLUMINANCE => ("illuminance", 2),
            TYPE_PRESENCE => ("presence", 1),
            TYPE_TEMPERATURE => ("temperature", 2),
            TYPE_HUMIDITY => ("humidity", 1),
            TYPE_ACCELEROMETER => ("accelerometer", 6),
            TYPE_BAROMETER => ("barometer", 2),
            TYPE_VOLTAGE => ("voltage", 2),
            TYPE_CURRENT => ("current", 2),
            TYPE_PERCENTAGE => ("percentage", 1),
            TYPE_UNIX_TIME => ("unix_time", 4),
            TYPE_GYROMETER => ("gyrometer", 6),
            TYPE_GPS => ("gps", 9),
            TYPE_SWITCH => ("switch", 1),
            other => return Err(DecodeError::UnsupportedType(other)),
        };
        Ok(described)
    }

    fn i16_at(data: &[u8], at: usize) -> f64 {
        f64::from(i16::from_be_bytes([data[at], data[at + 1]]))
    }

    fn u16_at(data: &[u8], at: usize) -> f64 {
        f64::from(u16::from_be_bytes([data[at], data[at + 1]]))
    }

    fn i24_at(data: &[u8], at: usize) -> f64 {
        // Sign-extend through the top byte of an i32
        let raw = (i32::from(data[at]) << 24)
            | (i32::from(data[at + 1]) << 16)
            | (i32::from(data[at + 2]) << 8);
        f64::from(raw >> 8)
    }

    fn u32_at(data: &[u8], at: usize) -> u32 {
        u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
    }

    fn xyz(data: &[u8], scale: f64) -> Value {
        json!({
            "x": Self::i16_at(data, 0) / scale,
            "y": Self::i16_at(data, 2) / scale,
            "z": Self::i16_at(data, 4) / scale,
        })
    }

    fn reading(type_id: u8, data: &[u8]) -> Result<Value> {
        let value = match type_id {
            TYPE_DIGITAL_INPUT | TYPE_DIGITAL_OUTPUT | TYPE_PRESENCE | TYPE_PERCENTAGE => {
                json!(data[0])
            }
            TYPE_ANALOG_INPUT | TYPE_ANALOG_OUTPUT | TYPE_VOLTAGE => {
                json!(Self::i16_at(data, 0) / 100.0)
            }
            TYPE_GENERIC_SENSOR => json!(Self::u32_at(data, 0)),
            TYPE_ILLUMINANCE => json!(u16::from_be_bytes([data[0], data[1]])),
            TYPE_TEMPERATURE => json!(Self::i16_at(data, 0) / 10.0),
            TYPE_HUMIDITY => json!(f64::from(data[0]) / 2.0),
            TYPE_ACCELEROMETER => Self::xyz(data, 1000.0),
            TYPE_BAROMETER => json!(Self::u16_at(data, 0) / 10.0),
            TYPE_CURRENT => json!(Self::u16_at(data, 0) / 1000.0),
            TYPE_GYROMETER => Self::xyz(data, 100.0),
            TYPE_GPS => json!({
                "latitude": Self::i24_at(data, 0) / 10000.0,
                "longitude": Self::i24_at(data, 3) / 10000.0,
                "altitude": Self::i24_at(data, 6) / 100.0,
            }),
            TYPE_UNIX_TIME => {
                let seconds = i64::from(Self::u32_at(data, 0));
                let at = DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
                    DecodeError::InvalidPayload(format!("invalid unix time: {}", seconds))
                })?;
                json!(at.to_rfc3339())
            }
            TYPE_SWITCH => json!(data[0] != 0),
            other => return Err(DecodeError::UnsupportedType(other)),
        };
        Ok(value)
    }

    /// Decodes a complete payload into `{"<type>_<channel>": value}`.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<Value> {
        let mut readings = Map::new();
        let mut offset = 0;

        while offset < bytes.len() {
            if offset + 2 > bytes.len() {
                return Err(DecodeError::InsufficientData {
                    expected: 2,
                    actual: bytes.len() - offset,
                });
            }
            let channel = bytes[offset];
            let type_id = bytes[offset + 1];
            offset += 2;

            let (name, size) = Self::describe(type_id)?;
            if offset + size > bytes.len() {
                return Err(DecodeError::InsufficientData {
                    expected: size,
                    actual: bytes.len() - offset,
                });
            }

            let value = Self::reading(type_id, &bytes[offset..offset + size])?;
            readings.insert(format!("{}_{}", name, channel), value);
            offset += size;
        }

        Ok(Value::Object(readings))
    }
}

impl Default for CayenneLppDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketDecoder for CayenneLppDecoder {
    fn format(&self) -> &'static str {
        CAYENNE_LPP_FORMAT
    }

    fn decode(&self, bytes: &[u8], _schema: &PacketSchema) -> Result<Value> {
        self.decode_bytes(bytes)
    }
}
