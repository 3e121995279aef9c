use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Retention intensity of a telemetry packet.
///
/// Ordered from the cheapest to the most expensive plan; the order matters for
/// comparisons only, fan-out is given by [`TrafficTier::retention_windows`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrafficTier {
    #[default]
    Low,
    Medium,
    High,
    Intensive,
}

impl TrafficTier {
    /// Archive windows a packet of this tier is replicated into. YEAR always comes first.
    pub fn retention_windows(&self) -> Vec<RetentionWindow> {
        match self {
            TrafficTier::Low => vec![RetentionWindow::Year],
            TrafficTier::Medium => vec![RetentionWindow::Year, RetentionWindow::Month],
            TrafficTier::High => vec![
                RetentionWindow::Year,
                RetentionWindow::Day,
                RetentionWindow::Quarter,
                RetentionWindow::Semester,
            ],
            TrafficTier::Intensive => vec![
                RetentionWindow::Year,
                RetentionWindow::Hour,
                RetentionWindow::Quarter,
                RetentionWindow::Semester,
            ],
        }
    }

    /// Finest granularity stored for this tier, used as the timeline step.
    pub fn timeline_step(&self) -> RetentionWindow {
        match self {
            TrafficTier::Low => RetentionWindow::Year,
            TrafficTier::Medium => RetentionWindow::Month,
            TrafficTier::High => RetentionWindow::Day,
            TrafficTier::Intensive => RetentionWindow::Hour,
        }
    }
}

impl FromStr for TrafficTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(TrafficTier::Low),
            "MEDIUM" => Ok(TrafficTier::Medium),
            "HIGH" => Ok(TrafficTier::High),
            "INTENSIVE" => Ok(TrafficTier::Intensive),
            other => Err(format!("unknown traffic tier: {}", other)),
        }
    }
}

/// Time bucket of the batch archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetentionWindow {
    Hour,
    Day,
    Month,
    Quarter,
    Semester,
    Year,
}

impl RetentionWindow {
    pub const ALL: [RetentionWindow; 6] = [
        RetentionWindow::Hour,
        RetentionWindow::Day,
        RetentionWindow::Month,
        RetentionWindow::Quarter,
        RetentionWindow::Semester,
        RetentionWindow::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionWindow::Hour => "hour",
            RetentionWindow::Day => "day",
            RetentionWindow::Month => "month",
            RetentionWindow::Quarter => "quarter",
            RetentionWindow::Semester => "semester",
            RetentionWindow::Year => "year",
        }
    }

    /// Archive bucket a millisecond timestamp falls into, e.g. `2024/Q2` for a quarter.
    pub fn bucket(&self, timestamp_millis: i64) -> String {
        let at: DateTime<Utc> =
            DateTime::from_timestamp_millis(timestamp_millis).unwrap_or(DateTime::UNIX_EPOCH);
        let year = at.year();
        match self {
            RetentionWindow::Hour => format!(
                "{}/{:02}/{:02}/{:02}",
                year,
                at.month(),
                at.day(),
                at.hour()
            ),
            RetentionWindow::Day => format!("{}/{:02}/{:02}", year, at.month(), at.day()),
            RetentionWindow::Month => format!("{}/{:02}", year, at.month()),
            RetentionWindow::Quarter => format!("{}/Q{}", year, at.month0() / 3 + 1),
            RetentionWindow::Semester => format!("{}/S{}", year, at.month0() / 6 + 1),
            RetentionWindow::Year => year.to_string(),
        }
    }
}

impl fmt::Display for RetentionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RetentionWindow::ALL
            .into_iter()
            .find(|w| w.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown retention window: {}", s))
    }
}
