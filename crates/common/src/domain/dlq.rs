use crate::domain::{encoding, AlarmState, ConversionStrategy, SinkWrite};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

pub const SENDER_STRATEGY: &str = "senderStrategy";
pub const PROJECT_ID: &str = "projectId";

const ROW_KEY: &str = "rowKey";
const ROW_KEY_PREFIX: &str = "rowKeyPrefix";
const TIMESTAMP: &str = "timestamp";
const PAYLOAD: &str = "payload";
const ATTACHMENTS: &str = "attachments";
const RULE_ID: &str = "ruleId";
const DEVICE_ID: &str = "deviceId";
const ALARM_STATE: &str = "alarmState";
const FIRED: &str = "fired";
const LAST_FIRED_TIMESTAMP: &str = "lastFiredTimestamp";
const VERSION: &str = "version";
const MESSAGE: &str = "message";
const ORIGINAL_PAYLOAD: &str = "originalPayload";
const STEP: &str = "step";
const BUCKET: &str = "bucket";

#[derive(Error, Debug)]
pub enum DlqError {
    #[error("DLQ envelope has no senderStrategy")]
    MissingStrategy,

    #[error("Unknown senderStrategy '{0}'")]
    UnknownStrategy(String),

    #[error("DLQ envelope for '{strategy}' is missing field '{field}'")]
    MissingField {
        strategy: ConversionStrategy,
        field: &'static str,
    },

    #[error("DLQ envelope field '{field}' has invalid value '{value}'")]
    InvalidField { field: &'static str, value: String },

    #[error("Malformed DLQ envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Flat string map capturing a failed storage write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DlqEnvelope(BTreeMap<String, String>);

impl DlqEnvelope {
    fn tagged(strategy: ConversionStrategy, project_id: u64) -> Self {
        let mut map = BTreeMap::new();
        map.insert(SENDER_STRATEGY.to_string(), strategy.tag().to_string());
        map.insert(PROJECT_ID.to_string(), project_id.to_string());
        Self(map)
    }

    fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn strategy(&self) -> Result<ConversionStrategy, DlqError> {
        let tag = self.get(SENDER_STRATEGY).ok_or(DlqError::MissingStrategy)?;
        ConversionStrategy::from_str(tag).map_err(|_| DlqError::UnknownStrategy(tag.to_string()))
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DlqError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn text(&self, strategy: ConversionStrategy, field: &'static str) -> Result<String, DlqError> {
        self.get(field)
            .map(str::to_string)
            .ok_or(DlqError::MissingField { strategy, field })
    }

    fn parsed<T: FromStr>(
        &self,
        strategy: ConversionStrategy,
        field: &'static str,
    ) -> Result<T, DlqError> {
        let raw = self.get(field).ok_or(DlqError::MissingField { strategy, field })?;
        raw.parse().map_err(|_| DlqError::InvalidField {
            field,
            value: raw.to_string(),
        })
    }
}

impl SinkWrite {
    /// Captures exactly the fields a replay needs to rebuild this write.
    pub fn capture(&self, project_id: u64) -> DlqEnvelope {
        let envelope = DlqEnvelope::tagged(self.strategy(), project_id);
        match self {
            SinkWrite::TelemetryAvro {
                row_key,
                timestamp,
                payload,
                attachments,
            } => {
                let encoded: BTreeMap<String, String> = attachments
                    .iter()
                    .map(|(id, bytes)| (id.to_string(), encoding::encode(bytes)))
                    .collect();
                envelope
                    .with(ROW_KEY, row_key)
                    .with(TIMESTAMP, timestamp)
                    .with(PAYLOAD, payload)
                    .with(
                        ATTACHMENTS,
                        serde_json::to_string(&encoded).unwrap_or_else(|_| "{}".to_string()),
                    )
            }
            SinkWrite::Event {
                row_key,
                rule_id,
                timestamp,
                payload,
            } => envelope
                .with(ROW_KEY, row_key)
                .with(RULE_ID, rule_id)
                .with(TIMESTAMP, timestamp)
                .with(PAYLOAD, payload),
            SinkWrite::Alarm {
                row_key,
                device_id,
                timestamp,
                alarm_state,
                payload,
            } => envelope
                .with(ROW_KEY, row_key)
                .with(DEVICE_ID, device_id)
                .with(TIMESTAMP, timestamp)
                .with(ALARM_STATE, alarm_state)
                .with(PAYLOAD, payload),
            SinkWrite::RuleState {
                rule_id,
                fired,
                last_fired_timestamp,
                version,
            } => {
                let envelope = envelope
                    .with(RULE_ID, rule_id)
                    .with(FIRED, fired)
                    .with(VERSION, version);
                match last_fired_timestamp {
                    Some(ts) => envelope.with(LAST_FIRED_TIMESTAMP, ts),
                    None => envelope,
                }
            }
            SinkWrite::Error {
                timestamp,
                message,
                original_payload,
            } => envelope
                .with(TIMESTAMP, timestamp)
                .with(MESSAGE, message)
                .with(ORIGINAL_PAYLOAD, original_payload),
            SinkWrite::Timeline {
                row_key_prefix,
                timestamp,
                step,
            } => envelope
                .with(ROW_KEY_PREFIX, row_key_prefix)
                .with(TIMESTAMP, timestamp)
                .with(STEP, step),
            SinkWrite::Archive {
                window: _,
                bucket,
                row_key,
                timestamp,
                payload,
            } => envelope
                .with(BUCKET, bucket)
                .with(ROW_KEY, row_key)
                .with(TIMESTAMP, timestamp)
                .with(PAYLOAD, payload),
        }
    }

    /// Rebuilds the captured write and the project it belongs to.
    pub fn replay(envelope: &DlqEnvelope) -> Result<(u64, SinkWrite), DlqError> {
        let strategy = envelope.strategy()?;
        let project_id: u64 = envelope.parsed(strategy, PROJECT_ID)?;

        let write = match strategy {
            ConversionStrategy::Telemetry => {
                let raw = envelope.text(strategy, ATTACHMENTS)?;
                let encoded: BTreeMap<u64, String> = serde_json::from_str(&raw)?;
                let attachments = encoded
                    .into_iter()
                    .map(|(id, text)| {
                        encoding::decode(&text)
                            .map(|bytes| (id, bytes))
                            .map_err(|_| DlqError::InvalidField {
                                field: ATTACHMENTS,
                                value: text,
                            })
                    })
                    .collect::<Result<_, _>>()?;
                SinkWrite::TelemetryAvro {
                    row_key: envelope.text(strategy, ROW_KEY)?,
                    timestamp: envelope.parsed(strategy, TIMESTAMP)?,
                    payload: envelope.text(strategy, PAYLOAD)?,
                    attachments,
                }
            }
            ConversionStrategy::Event => SinkWrite::Event {
                row_key: envelope.text(strategy, ROW_KEY)?,
                rule_id: envelope.parsed(strategy, RULE_ID)?,
                timestamp: envelope.parsed(strategy, TIMESTAMP)?,
                payload: envelope.text(strategy, PAYLOAD)?,
            },
            ConversionStrategy::Alarm => SinkWrite::Alarm {
                row_key: envelope.text(strategy, ROW_KEY)?,
                device_id: envelope.parsed(strategy, DEVICE_ID)?,
                timestamp: envelope.parsed(strategy, TIMESTAMP)?,
                alarm_state: envelope.parsed::<AlarmState>(strategy, ALARM_STATE)?,
                payload: envelope.text(strategy, PAYLOAD)?,
            },
            ConversionStrategy::RuleState => SinkWrite::RuleState {
                rule_id: envelope.parsed(strategy, RULE_ID)?,
                fired: envelope.parsed(strategy, FIRED)?,
                last_fired_timestamp: match envelope.get(LAST_FIRED_TIMESTAMP) {
                    Some(_) => Some(envelope.parsed(strategy, LAST_FIRED_TIMESTAMP)?),
                    None => None,
                },
                version: envelope.parsed(strategy, VERSION)?,
            },
            ConversionStrategy::Error => SinkWrite::Error {
                timestamp: envelope.parsed(strategy, TIMESTAMP)?,
                message: envelope.text(strategy, MESSAGE)?,
                original_payload: envelope.text(strategy, ORIGINAL_PAYLOAD)?,
            },
            ConversionStrategy::Timeline => SinkWrite::Timeline {
                row_key_prefix: envelope.text(strategy, ROW_KEY_PREFIX)?,
                timestamp: envelope.parsed(strategy, TIMESTAMP)?,
                step: envelope.parsed(strategy, STEP)?,
            },
            ConversionStrategy::HdfsHour
            | ConversionStrategy::HdfsDay
            | ConversionStrategy::HdfsMonth
            | ConversionStrategy::HdfsQuarter
            | ConversionStrategy::HdfsSemester
            | ConversionStrategy::HdfsYear => SinkWrite::Archive {
                window: strategy
                    .window()
                    .ok_or(DlqError::UnknownStrategy(strategy.tag().to_string()))?,
                bucket: envelope.text(strategy, BUCKET)?,
                row_key: envelope.text(strategy, ROW_KEY)?,
                timestamp: envelope.parsed(strategy, TIMESTAMP)?,
                payload: envelope.text(strategy, PAYLOAD)?,
            },
        };

        Ok((project_id, write))
    }
}
