use async_trait::async_trait;
use common::domain::{
    encoding, ConversionStrategy, DomainError, DomainResult, OutboundMessage, OutputChannel,
    Packet, SinkWrite,
};
use common::testing::RecordingEmitter;
use common::PipelineConfig;
use ingest_worker::domain::{DecoderRegistry, IngestInput, IngestService, PacketDeserializer};
use rule_worker::domain::{EvaluationOutcome, RuleEvaluationService};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use storage_worker::domain::{
    DlqReplayer, PacketRouter, RecoverableSink, ReplayOutcome, RouterService, SinkOutcome,
    SinkWriter, WriteOrigin,
};

const NOW: i64 = 1_717_243_200_000;
const PROJECT_ID: u64 = 3;

/// Sink writer keeping every write in memory; can be switched to fail.
#[derive(Default)]
struct InMemoryWriter {
    writes: Mutex<Vec<(u64, SinkWrite)>>,
    failing: Mutex<bool>,
}

impl InMemoryWriter {
    fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    fn strategies(&self) -> BTreeSet<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, write)| write.strategy().tag().to_string())
            .collect()
    }
}

#[async_trait]
impl SinkWriter for InMemoryWriter {
    async fn write(&self, project_id: u64, write: &SinkWrite) -> DomainResult<()> {
        if *self.failing.lock().unwrap() {
            return Err(DomainError::StorageError("store offline".to_string()));
        }
        self.writes.lock().unwrap().push((project_id, write.clone()));
        Ok(())
    }
}

fn pipeline() -> PipelineConfig {
    let properties = HashMap::from([
        ("project.id".to_string(), PROJECT_ID.to_string()),
        (
            "packet.12".to_string(),
            r#"{"id": 12, "name": "boiler", "format": "json", "trafficPlan": "LOW",
                "fields": [{"id": 1, "name": "temperature", "type": "FLOAT"}]}"#
                .to_string(),
        ),
        (
            "rule-engine.drools".to_string(),
            r#"{"7": {"id": 7, "name": "hot", "condition": "temperature > 30.0"},
                "8": {"id": 8, "name": "overheat", "condition": "temperature > 40.0"}}"#
                .to_string(),
        ),
        ("rule-engine.event-rules".to_string(), "[7]".to_string()),
        ("rule-engine.alarm-rules".to_string(), "[8]".to_string()),
        ("rule-engine.alarms".to_string(), r#"{"100": ["8"]}"#.to_string()),
    ]);
    PipelineConfig::from_properties(&properties).unwrap()
}

fn inbound(document: &[u8]) -> IngestInput {
    IngestInput::Message {
        subject: format!("streaming.{}", PROJECT_ID),
        key: Some("9.12".to_string()),
        payload: encoding::encode(document).into_bytes(),
    }
}

fn sink_messages(emitter: &RecordingEmitter) -> Vec<OutboundMessage> {
    emitter
        .messages()
        .into_iter()
        .filter(|m| matches!(m.channel, OutputChannel::Sink(_)))
        .collect()
}

async fn store_all(
    sinks: &HashMap<ConversionStrategy, RecoverableSink>,
    messages: Vec<OutboundMessage>,
) -> Vec<SinkOutcome> {
    let mut outcomes = Vec::new();
    for message in messages {
        let (OutputChannel::Sink(strategy) | OutputChannel::Replay(strategy)) = message.channel
        else {
            panic!("not a sink message: {}", message.channel);
        };
        let origin = if matches!(message.channel, OutputChannel::Replay(_)) {
            WriteOrigin::Replay
        } else {
            WriteOrigin::Live
        };
        let write = SinkWrite::decode(&message.payload).unwrap();
        outcomes.push(sinks[&strategy].write(message.project_id, write, origin).await);
    }
    outcomes
}

/// Runs one device message through deserializer, rule engine and router,
/// returning every published sink message.
async fn run_stages(document: &[u8]) -> Vec<OutboundMessage> {
    let config = pipeline();

    let ingest_emitter = Arc::new(RecordingEmitter::new());
    let deserializer =
        PacketDeserializer::new(&config, Arc::new(DecoderRegistry::standard())).unwrap();
    IngestService::new(Arc::new(deserializer), ingest_emitter.clone())
        .handle(inbound(document), NOW)
        .await
        .unwrap();
    let published = ingest_emitter.on(OutputChannel::Packets);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].subject(), "packets.3");
    let packet = Packet::decode(&published[0].payload).unwrap();

    let rule_emitter = Arc::new(RecordingEmitter::new());
    let rules = RuleEvaluationService::open(&config, vec![], rule_emitter.clone()).unwrap();
    let outcome = rules.handle(packet, NOW).await.unwrap();
    assert!(matches!(outcome, EvaluationOutcome::Completed));

    let storage_emitter = Arc::new(RecordingEmitter::new());
    let router = RouterService::new(PacketRouter::new(), storage_emitter.clone());
    for channel in [
        OutputChannel::Enriched,
        OutputChannel::EventStore,
        OutputChannel::AlarmStore,
    ] {
        for message in rule_emitter.on(channel) {
            router
                .handle(message.project_id, &message.payload, NOW)
                .await
                .unwrap();
        }
    }

    let mut sink = sink_messages(&rule_emitter);
    sink.extend(sink_messages(&storage_emitter));
    sink
}

#[tokio::test]
async fn test_device_message_reaches_every_store() {
    let messages = run_stages(br#"{"temperature": 45.0}"#).await;

    let writer = Arc::new(InMemoryWriter::default());
    let dlq_emitter = Arc::new(RecordingEmitter::new());
    let sinks = RecoverableSink::for_every_strategy(writer.clone(), writer.clone(), dlq_emitter.clone());

    let outcomes = store_all(&sinks, messages).await;
    assert!(outcomes.iter().all(|o| matches!(o, SinkOutcome::Written)));
    assert!(dlq_emitter.messages().is_empty());

    let expected: BTreeSet<String> = [
        "telemetry-avro",
        "hdfs-year",
        "timeline",
        "event",
        "alarm",
        "rule-state",
    ]
    .into_iter()
    .map(str::to_string)
    .collect();
    assert_eq!(writer.strategies(), expected);
    assert!(writer
        .writes
        .lock()
        .unwrap()
        .iter()
        .all(|(project_id, _)| *project_id == PROJECT_ID));
}

#[tokio::test]
async fn test_cold_reading_only_stores_telemetry() {
    let messages = run_stages(br#"{"temperature": 12.0}"#).await;

    let writer = Arc::new(InMemoryWriter::default());
    let sinks = RecoverableSink::for_every_strategy(
        writer.clone(),
        writer.clone(),
        Arc::new(RecordingEmitter::new()),
    );
    store_all(&sinks, messages).await;

    let strategies = writer.strategies();
    assert!(strategies.contains("telemetry-avro"));
    assert!(!strategies.contains("event"));
    assert!(!strategies.contains("alarm"));
}

#[tokio::test]
async fn test_failed_writes_are_replayed_from_the_dlq() {
    let messages = run_stages(br#"{"temperature": 45.0}"#).await;
    let total = messages.len();

    let writer = Arc::new(InMemoryWriter::default());
    writer.set_failing(true);
    let dlq_emitter = Arc::new(RecordingEmitter::new());
    let sinks = RecoverableSink::for_every_strategy(writer.clone(), writer.clone(), dlq_emitter.clone());

    let outcomes = store_all(&sinks, messages).await;
    assert!(outcomes.iter().all(|o| matches!(o, SinkOutcome::Captured)));
    let captured = dlq_emitter.on(OutputChannel::Dlq);
    assert_eq!(captured.len(), total);

    writer.set_failing(false);
    let replay_emitter = Arc::new(RecordingEmitter::new());
    let replayer = DlqReplayer::new(replay_emitter.clone());
    for envelope in &captured {
        assert!(matches!(
            replayer.execute(&envelope.payload).await,
            ReplayOutcome::Replayed(_)
        ));
    }

    let replayed: Vec<OutboundMessage> = replay_emitter
        .messages()
        .into_iter()
        .filter(|m| matches!(m.channel, OutputChannel::Replay(_)))
        .collect();
    assert_eq!(replayed.len(), total);

    let outcomes = store_all(&sinks, replayed).await;
    assert!(outcomes.iter().all(|o| matches!(o, SinkOutcome::Written)));
    assert_eq!(writer.writes.lock().unwrap().len(), total);
}
