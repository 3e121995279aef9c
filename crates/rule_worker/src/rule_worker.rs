use crate::domain::RuleEvaluationService;
use crate::nats::{RuleConsumerService, SnapshotFlusher};
use common::domain::{OutputChannel, RuleStateRepository};
use common::nats::{
    ConsumerOptions, NatsClient, NatsConsumeLoggingLayer, NatsConsumeLoggingService,
    NatsConsumeTracingConfig, NatsConsumeTracingLayer, NatsConsumeTracingService, NatsStreamEmitter,
    TowerConsumer,
};
use common::PipelineConfig;
use hyperstream_runner::{AppProcess, BoxedResultFuture, Closer};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::info;

type RuleLayeredService = NatsConsumeTracingService<NatsConsumeLoggingService<RuleConsumerService>>;

pub struct RuleWorkerConfig {
    pub consumer_name: String,
    pub nats_batch_size: usize,
    pub nats_batch_wait: Duration,
    pub max_deliver: Option<i64>,
    pub flush_interval: Duration,
}

/// Rule evaluation stage: packet consumer, periodic rule-state flush and a
/// closer that snapshots every fact on shutdown.
pub struct RuleWorker {
    consumer: TowerConsumer<RuleLayeredService>,
    flusher: SnapshotFlusher,
    service: Arc<RuleEvaluationService>,
}

impl RuleWorker {
    pub async fn new(
        pipeline: Arc<PipelineConfig>,
        repository: Arc<dyn RuleStateRepository>,
        nats_client: Arc<NatsClient>,
        config: RuleWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!(project_id = pipeline.project_id, "initializing rule worker");

        let seed = repository.load_fired_rules(pipeline.project_id).await?;
        info!(restored = seed.len(), "restored persisted rule state");

        let emitter = Arc::new(NatsStreamEmitter::new(
            nats_client.create_publisher_client(),
            "rule-engine",
        ));
        let service = Arc::new(RuleEvaluationService::open(&pipeline, seed, emitter)?);

        let layered_service = ServiceBuilder::new()
            .layer(NatsConsumeTracingLayer::new(NatsConsumeTracingConfig::new(
                "evaluate_rules",
            )))
            .layer(NatsConsumeLoggingLayer::new())
            .service(RuleConsumerService::new(Arc::clone(&service)));

        let options = ConsumerOptions::new(
            OutputChannel::Packets.stream(),
            config.consumer_name,
            OutputChannel::Packets.subject(pipeline.project_id),
        )
        .with_batch(config.nats_batch_size, config.nats_batch_wait)
        .with_max_deliver(config.max_deliver);

        let consumer = TowerConsumer::new(
            nats_client.create_consumer_client(),
            options,
            layered_service,
        )
        .await?;

        Ok(Self {
            consumer,
            flusher: SnapshotFlusher::new(Arc::clone(&service), config.flush_interval),
            service,
        })
    }

    pub fn into_runner_processes(self) -> (Vec<(&'static str, AppProcess)>, Closer) {
        let consumer = self.consumer;
        let consumer_process: AppProcess = Box::new(move |ctx| -> BoxedResultFuture {
            Box::pin(async move { consumer.run(ctx).await })
        });

        let flusher = self.flusher;
        let flusher_process: AppProcess = Box::new(move |ctx| -> BoxedResultFuture {
            Box::pin(async move { flusher.run(ctx).await })
        });

        let service = self.service;
        let closer: Closer = Box::new(move || -> BoxedResultFuture {
            Box::pin(async move {
                let flushed = service.close_and_flush().await?;
                info!(flushed, "flushed rule state on shutdown");
                Ok(())
            })
        });

        (
            vec![
                ("rule-consumer", consumer_process),
                ("rule-state-flusher", flusher_process),
            ],
            closer,
        )
    }
}
