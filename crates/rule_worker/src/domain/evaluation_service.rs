use crate::domain::{
    AlarmStateTransitionManager, EventDispatcher, RuleError, RuleSession, RULE_ENGINE_SOURCE_ID,
};
use common::domain::{
    ConversionStrategy, DomainResult, ErrorRecord, FiredRule, OutboundMessage, OutputChannel,
    Packet, StreamEmitter,
};
use chrono::Utc;
use common::PipelineConfig;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

/// Result of evaluating one inbound packet.
#[derive(Debug)]
pub enum EvaluationOutcome {
    Completed,
    /// Dispatch failed; the failure went to the error sink
    Recorded,
    /// The rule engine failed; the input must be redelivered
    Retry(RuleError),
}

struct EngineState {
    session: RuleSession,
    alarms: AlarmStateTransitionManager,
}

/// Owns the project's rule session and alarm table and drives them per packet.
pub struct RuleEvaluationService {
    project_id: u64,
    state: Mutex<Option<EngineState>>,
    emitter: Arc<dyn StreamEmitter>,
    dispatcher: EventDispatcher,
}

impl RuleEvaluationService {
    /// Opens the session once; fails at startup on any rule that does not compile.
    pub fn open(
        config: &PipelineConfig,
        seed: Vec<FiredRule>,
        emitter: Arc<dyn StreamEmitter>,
    ) -> Result<Self, RuleError> {
        let alarms = AlarmStateTransitionManager::new(&config.alarms, &seed);
        let session = RuleSession::open(config, seed)?;
        Ok(Self {
            project_id: config.project_id,
            state: Mutex::new(Some(EngineState { session, alarms })),
            dispatcher: EventDispatcher::new(Arc::clone(&emitter), config.project_id),
            emitter,
        })
    }

    pub fn project_id(&self) -> u64 {
        self.project_id
    }

    /// Evaluates a packet, publishes it annotated and dispatches its actions.
    ///
    /// Returns an error only when even the error sink could not be written.
    #[instrument(skip(self, packet), fields(packet_id = packet.id, device_id = packet.device_id))]
    pub async fn handle(&self, packet: Packet, now_millis: i64) -> DomainResult<EvaluationOutcome> {
        let mut guard = self.state.lock().await;
        let Some(EngineState { session, alarms }) = guard.as_mut() else {
            return Ok(EvaluationOutcome::Retry(RuleError::Evaluation {
                rule_id: 0,
                message: "rule session is closed".to_string(),
            }));
        };

        let original = packet.encode()?;
        let (annotated, actions) = match session.evaluate(packet, now_millis) {
            Ok(evaluated) => evaluated,
            Err(e) => {
                warn!(error = %e, "rule evaluation failed, requesting redelivery");
                return Ok(EvaluationOutcome::Retry(e));
            }
        };

        let dispatched = async {
            self.publish_enriched(&annotated).await?;
            self.dispatcher.dispatch(session, alarms, actions).await
        }
        .await;
        drop(guard);

        match dispatched {
            Ok(()) => {
                debug!(fired = annotated.fired_rules.len(), "processed packet");
                Ok(EvaluationOutcome::Completed)
            }
            Err(e) => {
                error!(error = %e, "failed to dispatch rule output");
                self.record_error(ErrorRecord::from_bytes(now_millis, e.to_string(), &original))
                    .await?;
                Ok(EvaluationOutcome::Recorded)
            }
        }
    }

    /// Writes a record to the error sink of this project.
    pub async fn record_error(&self, record: ErrorRecord) -> DomainResult<()> {
        let write = record.into_write();
        self.emitter
            .emit(
                OutboundMessage::new(
                    OutputChannel::Sink(ConversionStrategy::Error),
                    self.project_id,
                    write.encode()?,
                )
                .with_source(RULE_ENGINE_SOURCE_ID),
            )
            .await
    }

    /// Snapshots facts changed since the last flush. Returns how many were written.
    pub async fn flush_dirty(&self) -> DomainResult<usize> {
        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else {
            return Ok(0);
        };

        let dirty = state.session.take_dirty();
        if dirty.is_empty() {
            return Ok(0);
        }
        let count = dirty.len();
        let rule_ids: Vec<u64> = dirty.iter().map(|fact| fact.rule_id).collect();

        let flushed = self
            .dispatcher
            .record_rule_states(dirty, Utc::now().timestamp_millis())
            .await;
        if let Err(e) = flushed {
            state.session.mark_dirty(rule_ids);
            return Err(e);
        }
        debug!(count, "flushed rule state");
        Ok(count)
    }

    /// Closes the session and snapshots every fact. Later packets are redelivered.
    pub async fn close_and_flush(&self) -> DomainResult<usize> {
        let Some(state) = self.state.lock().await.take() else {
            return Ok(0);
        };
        let facts = state.session.close();
        let count = facts.len();
        self.dispatcher
            .record_rule_states(facts, Utc::now().timestamp_millis())
            .await?;
        debug!(count, "closed rule session");
        Ok(count)
    }

    async fn publish_enriched(&self, packet: &Packet) -> DomainResult<()> {
        self.emitter
            .emit(
                OutboundMessage::new(OutputChannel::Enriched, self.project_id, packet.encode()?)
                    .with_key(format!("{}.{}", packet.device_id, packet.id))
                    .with_source(RULE_ENGINE_SOURCE_ID),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{FieldValue, PacketField, SinkWrite, TrafficTier};
    use common::testing::RecordingEmitter;
    use std::collections::{BTreeMap, BTreeSet};

    fn config() -> PipelineConfig {
        PipelineConfig {
            project_id: 5,
            rule_sources: BTreeMap::from([
                (
                    7,
                    r#"{"id": 7, "name": "hot", "condition": "temperature > 30.0"}"#.to_string(),
                ),
                (
                    8,
                    r#"{"id": 8, "name": "mistyped", "packetId": 99, "condition": "temperature > 'hot'"}"#
                        .to_string(),
                ),
            ]),
            event_rules: BTreeSet::from([7, 8]),
            ..Default::default()
        }
    }

    fn packet(id: u64, temperature: f64) -> Packet {
        Packet {
            id,
            name: "weather".to_string(),
            device_id: 2,
            project_id: 5,
            traffic_tier: TrafficTier::Low,
            timestamp_field: "timestamp".to_string(),
            fields: vec![
                PacketField::new(1, "temperature", FieldValue::Float(temperature)),
                PacketField::new(2, "timestamp", FieldValue::Timestamp(10)),
            ],
            fired_rules: BTreeSet::new(),
        }
    }

    fn service(emitter: Arc<RecordingEmitter>) -> RuleEvaluationService {
        RuleEvaluationService::open(&config(), vec![], emitter).unwrap()
    }

    #[tokio::test]
    async fn test_publishes_annotated_packet() {
        let emitter = Arc::new(RecordingEmitter::new());
        let outcome = service(emitter.clone())
            .handle(packet(12, 35.0), 100)
            .await
            .unwrap();

        assert!(matches!(outcome, EvaluationOutcome::Completed));
        let enriched = emitter.on(OutputChannel::Enriched);
        assert_eq!(enriched.len(), 1);
        assert_eq!(enriched[0].key.as_deref(), Some("2.12"));
        let annotated = Packet::decode(&enriched[0].payload).unwrap();
        assert_eq!(annotated.fired_rules, BTreeSet::from([7]));
        assert_eq!(emitter.count(OutputChannel::EventStore), 1);
    }

    #[tokio::test]
    async fn test_engine_failure_requests_retry() {
        let emitter = Arc::new(RecordingEmitter::new());
        let outcome = service(emitter.clone())
            .handle(packet(99, 35.0), 100)
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            EvaluationOutcome::Retry(RuleError::Evaluation { rule_id: 8, .. })
        ));
        assert!(emitter.messages().is_empty());
    }

    #[tokio::test]
    async fn test_packet_with_null_field_is_published() {
        let emitter = Arc::new(RecordingEmitter::new());
        let service = service(emitter.clone());
        let mut partial = packet(12, 0.0);
        partial.fields[0].value = FieldValue::Null;
        partial
            .fields
            .push(PacketField::new(3, "humidity", FieldValue::Float(40.0)));

        for attempt in 0..3 {
            let outcome = service.handle(partial.clone(), 100 + attempt).await.unwrap();
            assert!(matches!(outcome, EvaluationOutcome::Completed));
        }

        let enriched = emitter.on(OutputChannel::Enriched);
        assert_eq!(enriched.len(), 3);
        assert!(Packet::decode(&enriched[0].payload)
            .unwrap()
            .fired_rules
            .is_empty());
        assert_eq!(emitter.count(OutputChannel::EventStore), 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_goes_to_error_sink() {
        let emitter = Arc::new(RecordingEmitter::new().fail_on(OutputChannel::EventStore));
        let outcome = service(emitter.clone())
            .handle(packet(12, 35.0), 100)
            .await
            .unwrap();

        assert!(matches!(outcome, EvaluationOutcome::Recorded));
        let errors = emitter.on(OutputChannel::Sink(ConversionStrategy::Error));
        assert_eq!(errors.len(), 1);
        let SinkWrite::Error {
            original_payload, ..
        } = SinkWrite::decode(&errors[0].payload).unwrap()
        else {
            panic!("expected an error write");
        };
        assert!(original_payload.contains("weather"));
    }

    #[tokio::test]
    async fn test_unwritable_error_sink_is_an_error() {
        let emitter = Arc::new(
            RecordingEmitter::new()
                .fail_on(OutputChannel::Enriched)
                .fail_on(OutputChannel::Sink(ConversionStrategy::Error)),
        );
        let result = service(emitter).handle(packet(12, 35.0), 100).await;
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_flush_dirty_writes_changed_facts() {
        let emitter = Arc::new(RecordingEmitter::new());
        let service = service(emitter.clone());
        service.handle(packet(12, 35.0), 100).await.unwrap();

        assert_eq!(service.flush_dirty().await.unwrap(), 1);
        assert_eq!(service.flush_dirty().await.unwrap(), 0);

        let states = emitter.on(OutputChannel::Sink(ConversionStrategy::RuleState));
        assert_eq!(states.len(), 1);
        let SinkWrite::RuleState {
            rule_id,
            fired,
            last_fired_timestamp,
            version,
        } = SinkWrite::decode(&states[0].payload).unwrap()
        else {
            panic!("expected a rule-state write");
        };
        assert_eq!((rule_id, fired, last_fired_timestamp), (7, true, Some(100)));
        assert!(version > 100);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_facts_dirty() {
        let emitter =
            Arc::new(RecordingEmitter::new().fail_on(OutputChannel::Sink(ConversionStrategy::RuleState)));
        let service = service(emitter);
        service.handle(packet(12, 35.0), 100).await.unwrap();

        assert!(service.flush_dirty().await.is_err());
        assert!(service.flush_dirty().await.is_err());
    }

    #[tokio::test]
    async fn test_close_flushes_every_fact_and_rejects_later_packets() {
        let emitter = Arc::new(RecordingEmitter::new());
        let service = service(emitter.clone());

        assert_eq!(service.close_and_flush().await.unwrap(), 2);
        assert_eq!(
            emitter.count(OutputChannel::Sink(ConversionStrategy::RuleState)),
            2
        );
        assert!(matches!(
            service.handle(packet(12, 35.0), 100).await.unwrap(),
            EvaluationOutcome::Retry(_)
        ));
        assert_eq!(service.close_and_flush().await.unwrap(), 0);
    }
}
