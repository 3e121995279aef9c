//! Pipeline configuration: packet schemas, rule sources and rule classification.
//!
//! Read once at startup from a flat property map and shared immutably by every
//! stage. Any malformed value is a startup failure.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info};

pub const PROJECT_ID_KEY: &str = "project.id";
pub const PACKET_KEY_PREFIX: &str = "packet.";
pub const RULE_SOURCES_KEY: &str = "rule-engine.drools";
pub const EVENT_RULES_KEY: &str = "rule-engine.event-rules";
pub const ALARM_RULES_KEY: &str = "rule-engine.alarm-rules";
pub const ALARMS_KEY: &str = "rule-engine.alarms";

static RULE_LIST: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^\[\s*(\d+\s*(,\s*\d+\s*)*)?\]$"));

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing configuration key '{0}'")]
    Missing(&'static str),

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Malformed rule list for '{key}': '{value}'")]
    InvalidRuleList { key: &'static str, value: String },

    #[error("Malformed alarm map: {0}")]
    InvalidAlarmMap(String),

    #[error("Rule {0} is neither an event rule nor an alarm rule")]
    UnclassifiedRule(u64),

    #[error("Alarm rule {0} is not a member of any alarm")]
    OrphanAlarmRule(u64),

    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Immutable pipeline configuration of one project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    pub project_id: u64,
    /// Raw schema descriptors keyed by packet id
    pub packet_schemas: BTreeMap<u64, String>,
    /// Rule source text keyed by rule id
    pub rule_sources: BTreeMap<u64, String>,
    pub event_rules: BTreeSet<u64>,
    pub alarm_rules: BTreeSet<u64>,
    /// Alarm id to member rule ids
    pub alarms: BTreeMap<u64, BTreeSet<u64>>,
}

impl PipelineConfig {
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let project_id = properties
            .get(PROJECT_ID_KEY)
            .ok_or(ConfigError::Missing(PROJECT_ID_KEY))
            .and_then(|raw| parse_id(PROJECT_ID_KEY, raw))?;

        let mut packet_schemas = BTreeMap::new();
        for (key, value) in properties {
            if let Some(id) = key.strip_prefix(PACKET_KEY_PREFIX) {
                packet_schemas.insert(parse_id(key, id)?, value.clone());
            }
        }

        let rule_sources = match properties.get(RULE_SOURCES_KEY) {
            Some(raw) => parse_rule_sources(raw)?,
            None => BTreeMap::new(),
        };
        let event_rules = parse_rule_list(EVENT_RULES_KEY, properties.get(EVENT_RULES_KEY))?;
        let alarm_rules = parse_rule_list(ALARM_RULES_KEY, properties.get(ALARM_RULES_KEY))?;
        let alarms = match properties.get(ALARMS_KEY) {
            Some(raw) => parse_alarm_map(raw)?,
            None => BTreeMap::new(),
        };

        let config = Self {
            project_id,
            packet_schemas,
            rule_sources,
            event_rules,
            alarm_rules,
            alarms,
        };
        config.validate()?;

        info!(
            project_id,
            packet_schemas = config.packet_schemas.len(),
            rules = config.rule_sources.len(),
            alarms = config.alarms.len(),
            "loaded pipeline configuration"
        );
        Ok(config)
    }

    /// Reads a JSON object of properties. Non-string values are kept as their JSON text.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "reading pipeline configuration");
        let raw: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let properties = raw
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(text) => (key, text),
                other => (key, other.to_string()),
            })
            .collect();
        Self::from_properties(&properties)
    }

    pub fn packet_schema(&self, packet_id: u64) -> Option<&str> {
        self.packet_schemas.get(&packet_id).map(String::as_str)
    }

    /// Alarm that an alarm rule belongs to.
    pub fn alarm_of(&self, rule_id: u64) -> Option<u64> {
        self.alarms
            .iter()
            .find(|(_, members)| members.contains(&rule_id))
            .map(|(alarm_id, _)| *alarm_id)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for rule_id in self.rule_sources.keys() {
            let is_event = self.event_rules.contains(rule_id);
            let is_alarm = self.alarm_rules.contains(rule_id);
            if !is_event && !is_alarm {
                return Err(ConfigError::UnclassifiedRule(*rule_id));
            }
            if is_alarm && self.alarm_of(*rule_id).is_none() {
                return Err(ConfigError::OrphanAlarmRule(*rule_id));
            }
        }
        Ok(())
    }
}

fn parse_id(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("'{}' is not a numeric id", raw),
    })
}

/// Parses a `"[1, 2, 3]"` style list; an absent key is an empty list.
fn parse_rule_list(key: &'static str, raw: Option<&String>) -> Result<BTreeSet<u64>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(BTreeSet::new());
    };
    let matcher = RULE_LIST.as_ref().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    let trimmed = raw.trim();
    if !matcher.is_match(trimmed) {
        return Err(ConfigError::InvalidRuleList {
            key,
            value: raw.clone(),
        });
    }
    trimmed[1..trimmed.len() - 1]
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| parse_id(key, token))
        .collect()
}

fn parse_rule_sources(raw: &str) -> Result<BTreeMap<u64, String>, ConfigError> {
    let map: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(raw).map_err(|e| ConfigError::InvalidValue {
            key: RULE_SOURCES_KEY.to_string(),
            reason: e.to_string(),
        })?;
    map.into_iter()
        .map(|(id, source)| {
            let source = match source {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            Ok((parse_id(RULE_SOURCES_KEY, &id)?, source))
        })
        .collect()
}

fn parse_alarm_map(raw: &str) -> Result<BTreeMap<u64, BTreeSet<u64>>, ConfigError> {
    let map: BTreeMap<String, Vec<String>> =
        serde_json::from_str(raw).map_err(|e| ConfigError::InvalidAlarmMap(e.to_string()))?;
    map.into_iter()
        .map(|(alarm_id, rule_ids)| {
            let alarm_id = alarm_id
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidAlarmMap(format!("alarm id '{}'", alarm_id)))?;
            let members = rule_ids
                .iter()
                .map(|id| {
                    id.trim()
                        .parse::<u64>()
                        .map_err(|_| ConfigError::InvalidAlarmMap(format!("rule id '{}'", id)))
                })
                .collect::<Result<BTreeSet<u64>, _>>()?;
            Ok((alarm_id, members))
        })
        .collect()
}
