use crate::domain::{DomainResult, FiredRule};
use async_trait::async_trait;

pub const TELEMETRY_TABLE: &str = "telemetry";
pub const EVENT_TABLE: &str = "events";
pub const ALARM_TABLE: &str = "alarms";
pub const RULE_STATE_TABLE: &str = "rule_state";
pub const ERROR_TABLE: &str = "errors";
pub const TIMELINE_TABLE: &str = "timeline";

pub const DATA_FAMILY: &str = "data";
pub const RULE_STATE_FAMILY: &str = "state";
pub const FIRED_QUALIFIER: &str = "fired";
pub const LAST_FIRED_QUALIFIER: &str = "lastFiredTimestamp";

/// Logical column-store table of one project, e.g. `events_3`.
pub fn project_table(base: &str, project_id: u64) -> String {
    format!("{}_{}", base, project_id)
}

/// One cell of a wide-column row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnCell {
    pub row_key: String,
    pub family: String,
    pub qualifier: String,
    pub timestamp: i64,
    pub value: String,
}

impl ColumnCell {
    pub fn new(
        row_key: impl Into<String>,
        family: impl Into<String>,
        qualifier: impl Into<String>,
        timestamp: i64,
        value: impl Into<String>,
    ) -> Self {
        Self {
            row_key: row_key.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            timestamp,
            value: value.into(),
        }
    }
}

/// Column-store contract used by the storage sinks.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ColumnStore: Send + Sync {
    /// Writes every cell of one logical put; fails as a whole.
    async fn put_cells(&self, table: &str, cells: Vec<ColumnCell>) -> DomainResult<()>;

    /// Latest version of every cell in a column family.
    async fn scan_family(&self, table: &str, family: &str) -> DomainResult<Vec<ColumnCell>>;
}

/// Archive-store contract used by the retention-window sinks.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn append(&self, path: &str, content: bytes::Bytes) -> DomainResult<()>;
}

/// Loads rule firing state persisted by the rule-state sink.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RuleStateRepository: Send + Sync {
    async fn load_fired_rules(&self, project_id: u64) -> DomainResult<Vec<FiredRule>>;
}
