use crate::domain::{encoding, AlarmState, RetentionWindow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tag identifying one storage table or stream and the write shape it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionStrategy {
    Telemetry,
    Event,
    Alarm,
    RuleState,
    Error,
    Timeline,
    HdfsHour,
    HdfsDay,
    HdfsMonth,
    HdfsQuarter,
    HdfsSemester,
    HdfsYear,
}

impl ConversionStrategy {
    pub const ALL: [ConversionStrategy; 12] = [
        ConversionStrategy::Telemetry,
        ConversionStrategy::Event,
        ConversionStrategy::Alarm,
        ConversionStrategy::RuleState,
        ConversionStrategy::Error,
        ConversionStrategy::Timeline,
        ConversionStrategy::HdfsHour,
        ConversionStrategy::HdfsDay,
        ConversionStrategy::HdfsMonth,
        ConversionStrategy::HdfsQuarter,
        ConversionStrategy::HdfsSemester,
        ConversionStrategy::HdfsYear,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            ConversionStrategy::Telemetry => "telemetry-avro",
            ConversionStrategy::Event => "event",
            ConversionStrategy::Alarm => "alarm",
            ConversionStrategy::RuleState => "rule-state",
            ConversionStrategy::Error => "error",
            ConversionStrategy::Timeline => "timeline",
            ConversionStrategy::HdfsHour => "hdfs-hour",
            ConversionStrategy::HdfsDay => "hdfs-day",
            ConversionStrategy::HdfsMonth => "hdfs-month",
            ConversionStrategy::HdfsQuarter => "hdfs-quarter",
            ConversionStrategy::HdfsSemester => "hdfs-semester",
            ConversionStrategy::HdfsYear => "hdfs-year",
        }
    }

    pub fn archive(window: RetentionWindow) -> Self {
        match window {
            RetentionWindow::Hour => ConversionStrategy::HdfsHour,
            RetentionWindow::Day => ConversionStrategy::HdfsDay,
            RetentionWindow::Month => ConversionStrategy::HdfsMonth,
            RetentionWindow::Quarter => ConversionStrategy::HdfsQuarter,
            RetentionWindow::Semester => ConversionStrategy::HdfsSemester,
            RetentionWindow::Year => ConversionStrategy::HdfsYear,
        }
    }

    /// Retention window of an archive strategy, `None` for column-store strategies.
    pub fn window(&self) -> Option<RetentionWindow> {
        match self {
            ConversionStrategy::HdfsHour => Some(RetentionWindow::Hour),
            ConversionStrategy::HdfsDay => Some(RetentionWindow::Day),
            ConversionStrategy::HdfsMonth => Some(RetentionWindow::Month),
            ConversionStrategy::HdfsQuarter => Some(RetentionWindow::Quarter),
            ConversionStrategy::HdfsSemester => Some(RetentionWindow::Semester),
            ConversionStrategy::HdfsYear => Some(RetentionWindow::Year),
            ConversionStrategy::Telemetry
            | ConversionStrategy::Event
            | ConversionStrategy::Alarm
            | ConversionStrategy::RuleState
            | ConversionStrategy::Error
            | ConversionStrategy::Timeline => None,
        }
    }
}

impl fmt::Display for ConversionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ConversionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConversionStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.tag() == s)
            .ok_or_else(|| format!("unknown conversion strategy: {}", s))
    }
}

/// Every storage write the pipeline performs.
///
/// This is the message carried on `sink.<tag>.<projectId>` and
/// `replay.<tag>.<projectId>`, and the unit captured into a DLQ envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SinkWrite {
    #[serde(rename_all = "camelCase")]
    TelemetryAvro {
        row_key: String,
        timestamp: i64,
        payload: String,
        #[serde(with = "encoding::base64_map")]
        attachments: BTreeMap<u64, Vec<u8>>,
    },
    #[serde(rename_all = "camelCase")]
    Event {
        row_key: String,
        rule_id: u64,
        timestamp: i64,
        payload: String,
    },
    #[serde(rename_all = "camelCase")]
    Alarm {
        row_key: String,
        device_id: u64,
        timestamp: i64,
        alarm_state: AlarmState,
        payload: String,
    },
    #[serde(rename_all = "camelCase")]
    RuleState {
        rule_id: u64,
        fired: bool,
        last_fired_timestamp: Option<i64>,
        /// Assigned when the snapshot is taken; the highest version of a rule wins
        version: i64,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        timestamp: i64,
        message: String,
        original_payload: String,
    },
    #[serde(rename_all = "camelCase")]
    Timeline {
        row_key_prefix: String,
        timestamp: i64,
        step: RetentionWindow,
    },
    #[serde(rename_all = "camelCase")]
    Archive {
        window: RetentionWindow,
        bucket: String,
        row_key: String,
        timestamp: i64,
        payload: String,
    },
}

impl SinkWrite {
    pub fn strategy(&self) -> ConversionStrategy {
        match self {
            SinkWrite::TelemetryAvro { .. } => ConversionStrategy::Telemetry,
            SinkWrite::Event { .. } => ConversionStrategy::Event,
            SinkWrite::Alarm { .. } => ConversionStrategy::Alarm,
            SinkWrite::RuleState { .. } => ConversionStrategy::RuleState,
            SinkWrite::Error { .. } => ConversionStrategy::Error,
            SinkWrite::Timeline { .. } => ConversionStrategy::Timeline,
            SinkWrite::Archive { window, .. } => ConversionStrategy::archive(*window),
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_tags_round_trip() {
        for strategy in ConversionStrategy::ALL {
            assert_eq!(strategy.tag().parse::<ConversionStrategy>().unwrap(), strategy);
        }
        assert_eq!(
            "telemetry-avro".parse::<ConversionStrategy>().unwrap(),
            ConversionStrategy::Telemetry
        );
        assert!("telemetry".parse::<ConversionStrategy>().is_err());
    }

    #[test]
    fn test_archive_strategy_windows() {
        for window in RetentionWindow::ALL {
            assert_eq!(ConversionStrategy::archive(window).window(), Some(window));
        }
        assert_eq!(ConversionStrategy::Event.window(), None);
    }

    #[test]
    fn test_archive_write_strategy_follows_window() {
        let write = SinkWrite::Archive {
            window: RetentionWindow::Quarter,
            bucket: "2024/Q2".to_string(),
            row_key: "HPACKET.1".to_string(),
            timestamp: 1,
            payload: "{}".to_string(),
        };
        assert_eq!(write.strategy(), ConversionStrategy::HdfsQuarter);
    }

    #[test]
    fn test_sink_write_wire_shape() {
        let write = SinkWrite::TelemetryAvro {
            row_key: "HPACKET.1".to_string(),
            timestamp: 10,
            payload: "{}".to_string(),
            attachments: BTreeMap::from([(4, vec![1, 2, 3])]),
        };
        let json: serde_json::Value = serde_json::from_slice(&write.encode().unwrap()).unwrap();
        assert_eq!(json["kind"], "telemetryAvro");
        assert_eq!(json["rowKey"], "HPACKET.1");
        assert_eq!(json["attachments"]["4"], "AQID");
        assert_eq!(SinkWrite::decode(&write.encode().unwrap()).unwrap(), write);
    }
}
