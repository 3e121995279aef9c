use crate::domain::{Condition, RuleError};
use common::domain::Packet;
use common::PipelineConfig;
use serde::Deserialize;

/// Rule source text as stored under `rule-engine.drools`.
///
/// ```json
/// {"id": 7, "name": "overheat", "packetId": 12,
///  "condition": "temperature > 30.0", "actions": ["notify"], "noOpAction": false}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    pub id: u64,
    pub name: String,
    /// Packet the rule listens to; `None` matches every packet
    #[serde(default)]
    pub packet_id: Option<u64>,
    pub condition: String,
    /// Names of the automations signalled on the process channel
    #[serde(default)]
    pub actions: Vec<String>,
    /// Alarm transitions of this rule skip the process signal
    #[serde(default)]
    pub no_op_action: bool,
}

impl RuleDefinition {
    pub fn parse(rule_id: u64, source: &str) -> Result<Self, RuleError> {
        let definition: RuleDefinition =
            serde_json::from_str(source).map_err(|e| RuleError::InvalidDefinition {
                rule_id,
                reason: e.to_string(),
            })?;
        if definition.id != rule_id {
            return Err(RuleError::InvalidDefinition {
                rule_id,
                reason: format!("source declares id {}", definition.id),
            });
        }
        Ok(definition)
    }

    /// Parses every rule source of the configuration.
    pub fn load_all(config: &PipelineConfig) -> Result<Vec<Self>, RuleError> {
        config
            .rule_sources
            .iter()
            .map(|(rule_id, source)| Self::parse(*rule_id, source))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Event,
    Alarm { alarm_id: u64 },
}

pub struct CompiledRule {
    pub definition: RuleDefinition,
    pub kind: RuleKind,
    pub condition: Condition,
}

impl CompiledRule {
    /// Compiles a definition, classifying it through the configured rule lists.
    pub fn compile(definition: RuleDefinition, config: &PipelineConfig) -> Result<Self, RuleError> {
        let rule_id = definition.id;
        let kind = if config.alarm_rules.contains(&rule_id) {
            let alarm_id = config
                .alarm_of(rule_id)
                .ok_or_else(|| RuleError::InvalidDefinition {
                    rule_id,
                    reason: "alarm rule is not a member of any alarm".to_string(),
                })?;
            RuleKind::Alarm { alarm_id }
        } else if config.event_rules.contains(&rule_id) {
            RuleKind::Event
        } else {
            return Err(RuleError::InvalidDefinition {
                rule_id,
                reason: "rule is neither an event rule nor an alarm rule".to_string(),
            });
        };

        let condition = Condition::compile(rule_id, &definition.condition)?;
        Ok(Self {
            definition,
            kind,
            condition,
        })
    }

    pub fn id(&self) -> u64 {
        self.definition.id
    }

    pub fn applies_to(&self, packet: &Packet) -> bool {
        self.definition
            .packet_id
            .map_or(true, |packet_id| packet_id == packet.id)
    }
}
