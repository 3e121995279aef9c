use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Persisted firing state of one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiredRule {
    pub rule_id: u64,
    pub fired: bool,
    pub last_fired_timestamp: Option<i64>,
}

impl FiredRule {
    pub fn unfired(rule_id: u64) -> Self {
        Self {
            rule_id,
            fired: false,
            last_fired_timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Up,
    #[default]
    Down,
}

impl AlarmState {
    pub fn from_firing(fired: bool) -> Self {
        if fired {
            AlarmState::Up
        } else {
            AlarmState::Down
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Up => "UP",
            AlarmState::Down => "DOWN",
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlarmState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(AlarmState::Up),
            "DOWN" => Ok(AlarmState::Down),
            other => Err(format!("unknown alarm state: {}", other)),
        }
    }
}
