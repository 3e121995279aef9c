use async_trait::async_trait;
use bytes::Bytes;
use common::domain::{
    encoding, project_table, ArchiveStore, ColumnCell, ColumnStore, DomainError, DomainResult,
    SinkWrite, ALARM_TABLE, DATA_FAMILY, ERROR_TABLE, EVENT_TABLE, FIRED_QUALIFIER,
    LAST_FIRED_QUALIFIER, RULE_STATE_FAMILY, RULE_STATE_TABLE, TELEMETRY_TABLE, TIMELINE_TABLE,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

pub const PAYLOAD_QUALIFIER: &str = "payload";
pub const ATTACHMENT_QUALIFIER_PREFIX: &str = "attachment";

/// Concrete storage write behind one sink strategy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SinkWriter: Send + Sync {
    async fn write(&self, project_id: u64, write: &SinkWrite) -> DomainResult<()>;
}

/// Writes column-store strategies as wide-column cells in `<table>_<projectId>`.
pub struct ColumnStoreSinkWriter {
    store: Arc<dyn ColumnStore>,
}

impl ColumnStoreSinkWriter {
    pub fn new(store: Arc<dyn ColumnStore>) -> Self {
        Self { store }
    }

    /// Target table base and cells of a write.
    pub fn cells(write: &SinkWrite) -> DomainResult<(&'static str, Vec<ColumnCell>)> {
        let cells = match write {
            SinkWrite::TelemetryAvro {
                row_key,
                timestamp,
                payload,
                attachments,
            } => {
                let mut cells = vec![ColumnCell::new(
                    row_key,
                    DATA_FAMILY,
                    timestamp.to_string(),
                    *timestamp,
                    payload,
                )];
                cells.extend(attachments.iter().map(|(field_id, bytes)| {
                    ColumnCell::new(
                        row_key,
                        DATA_FAMILY,
                        format!("{}.{}.{}", ATTACHMENT_QUALIFIER_PREFIX, field_id, timestamp),
                        *timestamp,
                        encoding::encode(bytes),
                    )
                }));
                (TELEMETRY_TABLE, cells)
            }
            SinkWrite::Event {
                row_key,
                rule_id,
                timestamp,
                payload,
            } => (
                EVENT_TABLE,
                vec![
                    ColumnCell::new(row_key, DATA_FAMILY, PAYLOAD_QUALIFIER, *timestamp, payload),
                    ColumnCell::new(row_key, DATA_FAMILY, "ruleId", *timestamp, rule_id.to_string()),
                ],
            ),
            SinkWrite::Alarm {
                row_key,
                device_id,
                timestamp,
                alarm_state,
                payload,
            } => (
                ALARM_TABLE,
                vec![
                    ColumnCell::new(row_key, DATA_FAMILY, PAYLOAD_QUALIFIER, *timestamp, payload),
                    ColumnCell::new(
                        row_key,
                        DATA_FAMILY,
                        "alarmState",
                        *timestamp,
                        alarm_state.as_str(),
                    ),
                    ColumnCell::new(
                        row_key,
                        DATA_FAMILY,
                        "deviceId",
                        *timestamp,
                        device_id.to_string(),
                    ),
                ],
            ),
            SinkWrite::RuleState {
                rule_id,
                fired,
                last_fired_timestamp,
                version,
            } => {
                let row_key = rule_id.to_string();
                let mut cells = vec![ColumnCell::new(
                    &row_key,
                    RULE_STATE_FAMILY,
                    FIRED_QUALIFIER,
                    *version,
                    fired.to_string(),
                )];
                if let Some(last_fired) = last_fired_timestamp {
                    cells.push(ColumnCell::new(
                        &row_key,
                        RULE_STATE_FAMILY,
                        LAST_FIRED_QUALIFIER,
                        *version,
                        last_fired.to_string(),
                    ));
                }
                (RULE_STATE_TABLE, cells)
            }
            SinkWrite::Error {
                timestamp,
                message,
                original_payload,
            } => {
                let row_key = error_row_key(*timestamp, message, original_payload);
                (
                    ERROR_TABLE,
                    vec![
                        ColumnCell::new(&row_key, DATA_FAMILY, "message", *timestamp, message),
                        ColumnCell::new(
                            &row_key,
                            DATA_FAMILY,
                            "originalPayload",
                            *timestamp,
                            original_payload,
                        ),
                    ],
                )
            }
            SinkWrite::Timeline {
                row_key_prefix,
                timestamp,
                step,
            } => (
                TIMELINE_TABLE,
                vec![ColumnCell::new(
                    format!("{}_{}", row_key_prefix, step.bucket(*timestamp)),
                    DATA_FAMILY,
                    timestamp.to_string(),
                    *timestamp,
                    step.as_str(),
                )],
            ),
            SinkWrite::Archive { .. } => {
                return Err(DomainError::InvalidPacket(format!(
                    "{} is not a column-store write",
                    write.strategy()
                )))
            }
        };
        Ok(cells)
    }
}

#[async_trait]
impl SinkWriter for ColumnStoreSinkWriter {
    async fn write(&self, project_id: u64, write: &SinkWrite) -> DomainResult<()> {
        let (base, cells) = Self::cells(write)?;
        let table = project_table(base, project_id);
        debug!(table = %table, cells = cells.len(), "writing to column store");
        self.store.put_cells(&table, cells).await
    }
}

/// `<timestamp>_<digest>`, distinct for different failures in the same millisecond.
fn error_row_key(timestamp: i64, message: &str, original_payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(message.as_bytes());
    hasher.update([0u8]);
    hasher.update(original_payload.as_bytes());
    let digest: String = hasher.finalize()[..8]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("{}_{}", timestamp, digest)
}

/// Appends retention-window records to the archive store.
///
/// Objects are laid out as `<projectId>/<window>/<bucket>/<rowKey>.<timestamp>`.
pub struct ArchiveSinkWriter {
    store: Arc<dyn ArchiveStore>,
}

impl ArchiveSinkWriter {
    pub fn new(store: Arc<dyn ArchiveStore>) -> Self {
        Self { store }
    }

    pub fn path(project_id: u64, write: &SinkWrite) -> DomainResult<String> {
        match write {
            SinkWrite::Archive {
                window,
                bucket,
                row_key,
                timestamp,
                ..
            } => Ok(format!(
                "{}/{}/{}/{}.{}",
                project_id, window, bucket, row_key, timestamp
            )),
            other => Err(DomainError::InvalidPacket(format!(
                "{} is not an archive write",
                other.strategy()
            ))),
        }
    }
}

#[async_trait]
impl SinkWriter for ArchiveSinkWriter {
    async fn write(&self, project_id: u64, write: &SinkWrite) -> DomainResult<()> {
        let path = Self::path(project_id, write)?;
        let SinkWrite::Archive { payload, .. } = write else {
            return Err(DomainError::InvalidPacket(path));
        };
        debug!(path = %path, "appending to archive");
        self.store
            .append(&path, Bytes::from(payload.clone().into_bytes()))
            .await
    }
}
