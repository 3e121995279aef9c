use crate::domain::{packet_context, CompiledRule, RuleDefinition, RuleError, RuleKind};
use common::domain::{FiredRule, Packet};
use common::PipelineConfig;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Action registered by a rule during one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredAction {
    pub rule_id: u64,
    pub rule_name: String,
    pub kind: RuleKind,
    /// Condition result of this evaluation
    pub fired: bool,
    pub no_op: bool,
    pub actions: Vec<String>,
    /// Packet as it entered the session
    pub packet: Packet,
    pub timestamp: i64,
}

/// Long-lived rule session of one project.
///
/// Holds the compiled rules and one `FiredRule` fact per rule. Facts survive
/// across evaluations; actions are handed back and never retained.
pub struct RuleSession {
    project_id: u64,
    rules: Vec<CompiledRule>,
    facts: BTreeMap<u64, FiredRule>,
    dirty: BTreeSet<u64>,
}

impl RuleSession {
    /// Compiles every configured rule and seeds facts from persisted state.
    pub fn open(config: &PipelineConfig, seed: Vec<FiredRule>) -> Result<Self, RuleError> {
        let definitions = RuleDefinition::load_all(config)?;
        Self::from_definitions(config, definitions, seed)
    }

    pub fn from_definitions(
        config: &PipelineConfig,
        definitions: Vec<RuleDefinition>,
        seed: Vec<FiredRule>,
    ) -> Result<Self, RuleError> {
        let rules = definitions
            .into_iter()
            .map(|definition| CompiledRule::compile(definition, config))
            .collect::<Result<Vec<_>, _>>()?;

        let mut facts: BTreeMap<u64, FiredRule> = rules
            .iter()
            .map(|rule| (rule.id(), FiredRule::unfired(rule.id())))
            .collect();
        for persisted in seed {
            if let Some(fact) = facts.get_mut(&persisted.rule_id) {
                *fact = persisted;
            }
        }

        debug!(
            project_id = config.project_id,
            rules = rules.len(),
            "opened rule session"
        );

        Ok(Self {
            project_id: config.project_id,
            rules,
            facts,
            dirty: BTreeSet::new(),
        })
    }

    pub fn project_id(&self) -> u64 {
        self.project_id
    }

    pub fn fact(&self, rule_id: u64) -> Option<&FiredRule> {
        self.facts.get(&rule_id)
    }

    pub fn facts(&self) -> impl Iterator<Item = &FiredRule> {
        self.facts.values()
    }

    /// Runs every applicable rule over the packet.
    ///
    /// All conditions are evaluated before any fact changes, so a failing rule
    /// leaves the session untouched and the input can be redelivered.
    pub fn evaluate(
        &mut self,
        mut packet: Packet,
        now_millis: i64,
    ) -> Result<(Packet, Vec<FiredAction>), RuleError> {
        let context = packet_context(&packet);
        let results = self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(&packet))
            .map(|rule| Ok((rule, rule.condition.matches(rule.id(), &context)?)))
            .collect::<Result<Vec<_>, RuleError>>()?;

        let original = packet.clone();
        let mut actions = Vec::new();
        for (rule, matched) in results {
            let rule_id = rule.id();
            if let Some(fact) = self.facts.get_mut(&rule_id) {
                let before = fact.clone();
                fact.fired = matched;
                if matched {
                    fact.last_fired_timestamp = Some(now_millis);
                }
                if *fact != before {
                    self.dirty.insert(rule_id);
                }
            }

            if matched {
                packet.fired_rules.insert(rule_id);
            }

            let registers = match rule.kind {
                RuleKind::Event => matched,
                RuleKind::Alarm { .. } => true,
            };
            if registers {
                actions.push(FiredAction {
                    rule_id,
                    rule_name: rule.definition.name.clone(),
                    kind: rule.kind,
                    fired: matched,
                    no_op: rule.definition.no_op_action,
                    actions: rule.definition.actions.clone(),
                    packet: original.clone(),
                    timestamp: now_millis,
                });
            }
        }

        debug!(
            packet_id = packet.id,
            fired = packet.fired_rules.len(),
            actions = actions.len(),
            "evaluated packet"
        );
        Ok((packet, actions))
    }

    /// Facts changed since the previous call.
    pub fn take_dirty(&mut self) -> Vec<FiredRule> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter_map(|rule_id| self.facts.get(&rule_id).cloned())
            .collect()
    }

    /// Puts facts back in the dirty set after a failed flush.
    pub fn mark_dirty(&mut self, rule_ids: impl IntoIterator<Item = u64>) {
        self.dirty.extend(
            rule_ids
                .into_iter()
                .filter(|rule_id| self.facts.contains_key(rule_id)),
        );
    }

    /// Ends the session, handing back every fact for a final snapshot.
    pub fn close(self) -> Vec<FiredRule> {
        self.facts.into_values().collect()
    }
}
