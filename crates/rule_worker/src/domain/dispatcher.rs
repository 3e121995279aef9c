use crate::domain::{AlarmStateTransitionManager, AlarmTransition, FiredAction, RuleKind, RuleSession};
use common::domain::{
    ConversionStrategy, DomainResult, FieldValue, FiredRule, OutboundMessage, OutputChannel,
    Packet, PacketField, SinkWrite, StreamEmitter, ALARM_EVENT_SUFFIX, ALARM_ID_FIELD,
    ALARM_STATE_FIELD, DEVICE_ID_FIELD, EVENT_SUFFIX, PAYLOAD_FIELD, RULE_ID_FIELD,
    TIMESTAMP_FIELD,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const RULE_ENGINE_SOURCE_ID: &str = "rule-engine";

/// Strictly increasing rule-state snapshot versions.
///
/// A version is the snapshot time in millis, bumped past the previous one
/// when the clock has not moved, so a replayed older snapshot never outranks
/// a newer one in the store.
#[derive(Debug, Default)]
pub struct SnapshotVersions {
    last: AtomicI64,
}

impl SnapshotVersions {
    pub fn next(&self, now_millis: i64) -> i64 {
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_millis.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now_millis.max(previous + 1)
    }
}

/// Turns fired actions into derived packets and rule-state snapshots.
pub struct EventDispatcher {
    emitter: Arc<dyn StreamEmitter>,
    project_id: u64,
    versions: SnapshotVersions,
}

impl EventDispatcher {
    pub fn new(emitter: Arc<dyn StreamEmitter>, project_id: u64) -> Self {
        Self {
            emitter,
            project_id,
            versions: SnapshotVersions::default(),
        }
    }

    /// Dispatches every action in order. The first failed publish aborts the rest.
    pub async fn dispatch(
        &self,
        session: &RuleSession,
        alarms: &mut AlarmStateTransitionManager,
        actions: Vec<FiredAction>,
    ) -> DomainResult<()> {
        for action in actions {
            let Some(fact) = session.fact(action.rule_id).cloned() else {
                warn!(rule_id = action.rule_id, "no fact for fired rule, skipping action");
                continue;
            };

            match action.kind {
                RuleKind::Alarm { alarm_id } => {
                    self.dispatch_alarm(alarms, alarm_id, &fact, &action).await?
                }
                RuleKind::Event => self.dispatch_event(&fact, &action).await?,
            }
        }
        Ok(())
    }

    /// Publishes rule-state snapshots taken at `now_millis` to the rule-state sink.
    pub async fn record_rule_states(
        &self,
        facts: Vec<FiredRule>,
        now_millis: i64,
    ) -> DomainResult<()> {
        for fact in facts {
            self.record_rule_state(&fact, now_millis).await?;
        }
        Ok(())
    }

    async fn record_rule_state(&self, fact: &FiredRule, now_millis: i64) -> DomainResult<()> {
        let write = SinkWrite::RuleState {
            rule_id: fact.rule_id,
            fired: fact.fired,
            last_fired_timestamp: fact.last_fired_timestamp,
            version: self.versions.next(now_millis),
        };
        self.emitter
            .emit(
                OutboundMessage::new(
                    OutputChannel::Sink(ConversionStrategy::RuleState),
                    self.project_id,
                    write.encode()?,
                )
                .with_key(fact.rule_id.to_string())
                .with_source(RULE_ENGINE_SOURCE_ID),
            )
            .await
    }

    async fn dispatch_alarm(
        &self,
        alarms: &mut AlarmStateTransitionManager,
        alarm_id: u64,
        fact: &FiredRule,
        action: &FiredAction,
    ) -> DomainResult<()> {
        self.record_rule_state(fact, action.timestamp).await?;

        let Some(transition) = alarms.apply(alarm_id, fact) else {
            return Ok(());
        };
        debug!(
            alarm_id,
            rule_id = action.rule_id,
            from = %transition.from,
            to = %transition.to,
            "alarm state changed"
        );

        let packet = alarm_event_packet(action, fact, &transition);
        self.emit_packet(OutputChannel::Realtime, &packet, action.rule_id)
            .await?;
        if !action.no_op {
            self.emit_packet(OutputChannel::Process, &packet, action.rule_id)
                .await?;
        }
        self.emit_packet(OutputChannel::AlarmStore, &packet, action.rule_id)
            .await
    }

    async fn dispatch_event(&self, fact: &FiredRule, action: &FiredAction) -> DomainResult<()> {
        let packet = event_packet(action, fact);
        for channel in [
            OutputChannel::Realtime,
            OutputChannel::Process,
            OutputChannel::EventStore,
        ] {
            self.emit_packet(channel, &packet, action.rule_id).await?;
        }
        debug!(rule_id = action.rule_id, "dispatched event");
        Ok(())
    }

    async fn emit_packet(
        &self,
        channel: OutputChannel,
        packet: &Packet,
        rule_id: u64,
    ) -> DomainResult<()> {
        self.emitter
            .emit(
                OutboundMessage::new(channel, self.project_id, packet.encode()?)
                    .with_key(rule_id.to_string())
                    .with_source(RULE_ENGINE_SOURCE_ID),
            )
            .await
    }
}

fn fired_timestamp(action: &FiredAction, fact: &FiredRule) -> i64 {
    fact.last_fired_timestamp.unwrap_or(action.timestamp)
}

fn derived_packet(action: &FiredAction, name: String, fields: Vec<PacketField>) -> Packet {
    Packet {
        id: 0,
        name,
        device_id: action.packet.device_id,
        project_id: action.packet.project_id,
        traffic_tier: action.packet.traffic_tier,
        timestamp_field: TIMESTAMP_FIELD.to_string(),
        fields,
        fired_rules: BTreeSet::new(),
    }
}

fn event_packet(action: &FiredAction, fact: &FiredRule) -> Packet {
    let fields = vec![
        PacketField::new(1, RULE_ID_FIELD, FieldValue::Integer(action.rule_id as i64)),
        PacketField::new(
            2,
            TIMESTAMP_FIELD,
            FieldValue::Timestamp(fired_timestamp(action, fact)),
        ),
        PacketField::new(
            3,
            PAYLOAD_FIELD,
            FieldValue::Text(action.packet.fields_json().to_string()),
        ),
        PacketField::new(
            4,
            DEVICE_ID_FIELD,
            FieldValue::Integer(action.packet.device_id as i64),
        ),
    ];
    derived_packet(action, format!("{}{}", action.rule_name, EVENT_SUFFIX), fields)
}

fn alarm_event_packet(
    action: &FiredAction,
    fact: &FiredRule,
    transition: &AlarmTransition,
) -> Packet {
    let fields = vec![
        PacketField::new(1, RULE_ID_FIELD, FieldValue::Integer(action.rule_id as i64)),
        PacketField::new(
            2,
            ALARM_ID_FIELD,
            FieldValue::Integer(transition.alarm_id as i64),
        ),
        PacketField::new(
            3,
            TIMESTAMP_FIELD,
            FieldValue::Timestamp(fired_timestamp(action, fact)),
        ),
        PacketField::new(
            4,
            DEVICE_ID_FIELD,
            FieldValue::Integer(action.packet.device_id as i64),
        ),
        PacketField::new(
            5,
            ALARM_STATE_FIELD,
            FieldValue::Text(transition.to.to_string()),
        ),
        PacketField::new(
            6,
            PAYLOAD_FIELD,
            FieldValue::Text(action.packet.fields_json().to_string()),
        ),
    ];
    derived_packet(
        action,
        format!("{}{}", action.rule_name, ALARM_EVENT_SUFFIX),
        fields,
    )
}
