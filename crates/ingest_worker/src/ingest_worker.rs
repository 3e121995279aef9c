use crate::domain::{DecoderRegistry, IngestService, PacketDeserializer};
use crate::nats::{HeartbeatTicker, IngestConsumerService};
use common::domain::{inbound_subject, INBOUND_PREFIX};
use common::nats::{
    ConsumerOptions, NatsClient, NatsConsumeLoggingLayer, NatsConsumeLoggingService,
    NatsConsumeTracingConfig, NatsConsumeTracingLayer, NatsConsumeTracingService, NatsStreamEmitter,
    TowerConsumer,
};
use common::PipelineConfig;
use hyperstream_runner::{AppProcess, BoxedResultFuture};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::info;

type IngestLayeredService =
    NatsConsumeTracingService<NatsConsumeLoggingService<IngestConsumerService>>;

pub struct IngestWorkerConfig {
    pub consumer_name: String,
    pub nats_batch_size: usize,
    pub nats_batch_wait: Duration,
    pub max_deliver: Option<i64>,
    pub heartbeat_interval: Duration,
}

/// Deserializer stage: inbound consumer plus heartbeat ticker.
pub struct IngestWorker {
    consumer: TowerConsumer<IngestLayeredService>,
    heartbeat: HeartbeatTicker,
}

impl IngestWorker {
    pub async fn new(
        pipeline: Arc<PipelineConfig>,
        registry: Arc<DecoderRegistry>,
        nats_client: Arc<NatsClient>,
        config: IngestWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!(project_id = pipeline.project_id, "initializing ingest worker");

        let deserializer = Arc::new(PacketDeserializer::new(&pipeline, registry)?);
        let emitter = Arc::new(NatsStreamEmitter::new(
            nats_client.create_publisher_client(),
            "deserializer",
        ));
        let service = Arc::new(IngestService::new(deserializer, emitter));

        let layered_service = ServiceBuilder::new()
            .layer(NatsConsumeTracingLayer::new(NatsConsumeTracingConfig::new(
                "deserialize_packet",
            )))
            .layer(NatsConsumeLoggingLayer::new())
            .service(IngestConsumerService::new(Arc::clone(&service)));

        let options = ConsumerOptions::new(
            INBOUND_PREFIX,
            config.consumer_name,
            inbound_subject(pipeline.project_id),
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
            heartbeat: HeartbeatTicker::new(service, config.heartbeat_interval),
        })
    }

    pub fn into_runner_processes(self) -> Vec<(&'static str, AppProcess)> {
        let consumer = self.consumer;
        let consumer_process: AppProcess = Box::new(move |ctx| -> BoxedResultFuture {
            Box::pin(async move { consumer.run(ctx).await })
        });

        let heartbeat = self.heartbeat;
        let heartbeat_process: AppProcess = Box::new(move |ctx| -> BoxedResultFuture {
            Box::pin(async move { heartbeat.run(ctx).await })
        });

        vec![
            ("ingest-consumer", consumer_process),
            ("ingest-heartbeat", heartbeat_process),
        ]
    }
}
