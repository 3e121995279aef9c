//! CEL conditions over packets.
//!
//! Every top-level packet field is bound as a variable under its own name;
//! nested objects become maps, timestamps are epoch milliseconds and file
//! fields are bytes. The packet header is bound as `packet`
//! (`packet.id`, `packet.name`, `packet.deviceId`, `packet.timestamp`).
//!
//! ```cel
//! temperature > 30.0 && packet.deviceId == 12
//! ```
//!
//! A condition whose operand is null or missing from the packet does not
//! match. Any other execution failure is an evaluation error.

use crate::domain::RuleError;
use cel_interpreter::objects::{Key, Map};
use cel_interpreter::{Context, ExecutionError, Program, Value as CelValue};
use common::domain::{FieldValue, Packet, PacketField};
use std::collections::HashMap;
use std::sync::Arc;

/// A rule condition compiled once when the session opens.
pub struct Condition {
    source: String,
    program: Program,
}

impl Condition {
    pub fn compile(rule_id: u64, source: &str) -> Result<Self, RuleError> {
        let program = Program::compile(source).map_err(|e| RuleError::Compilation {
            rule_id,
            message: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            program,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, rule_id: u64, context: &Context) -> Result<bool, RuleError> {
        match self.program.execute(context) {
            Ok(CelValue::Bool(matched)) => Ok(matched),
            Ok(other) => Err(RuleError::Evaluation {
                rule_id,
                message: format!("condition returned {:?} instead of a boolean", other),
            }),
            Err(e) if self.is_absent_operand(&e) => Ok(false),
            Err(e) => Err(RuleError::Evaluation {
                rule_id,
                message: e.to_string(),
            }),
        }
    }

    fn is_absent_operand(&self, error: &ExecutionError) -> bool {
        match error {
            ExecutionError::UndeclaredReference(name) => {
                self.program.references().has_variable(name.as_str())
            }
            ExecutionError::NoSuchKey(_) => true,
            ExecutionError::ValuesNotComparable(left, right)
            | ExecutionError::UnsupportedBinaryOperator(_, left, right) => {
                is_null(left) || is_null(right)
            }
            ExecutionError::UnsupportedUnaryOperator(_, operand) => is_null(operand),
            _ => false,
        }
    }
}

fn is_null(value: &CelValue) -> bool {
    matches!(value, CelValue::Null)
}

/// Builds the evaluation context of one packet.
pub fn packet_context(packet: &Packet) -> Context<'static> {
    let mut context = Context::default();

    let mut header: HashMap<Key, CelValue> = HashMap::new();
    header.insert(key("id"), CelValue::Int(packet.id as i64));
    header.insert(key("name"), CelValue::String(Arc::new(packet.name.clone())));
    header.insert(key("deviceId"), CelValue::Int(packet.device_id as i64));
    header.insert(
        key("timestamp"),
        packet.timestamp().map(CelValue::Int).unwrap_or(CelValue::Null),
    );
    context.add_variable_from_value(
        "packet",
        CelValue::Map(Map {
            map: Arc::new(header),
        }),
    );

    for field in &packet.fields {
        context.add_variable_from_value(field.name.clone(), field_to_cel(&field.value));
    }
    context
}

fn key(name: &str) -> Key {
    Key::String(Arc::new(name.to_string()))
}

fn field_to_cel(value: &FieldValue) -> CelValue {
    match value {
        FieldValue::Null => CelValue::Null,
        FieldValue::Bool(b) => CelValue::Bool(*b),
        FieldValue::Integer(i) | FieldValue::Timestamp(i) => CelValue::Int(*i),
        FieldValue::Float(f) => CelValue::Float(*f),
        FieldValue::Text(s) => CelValue::String(Arc::new(s.clone())),
        FieldValue::Object(children) => CelValue::Map(Map {
            map: Arc::new(object_to_cel(children)),
        }),
        FieldValue::File(bytes) => CelValue::Bytes(Arc::new(bytes.clone())),
    }
}

fn object_to_cel(children: &[PacketField]) -> HashMap<Key, CelValue> {
    children
        .iter()
        .map(|child| (key(&child.name), field_to_cel(&child.value)))
        .collect()
}
