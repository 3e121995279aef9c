use crate::domain::{
    ArchiveSinkWriter, ColumnStoreSinkWriter, DlqReplayer, PacketRouter, RecoverableSink,
    RouterService,
};
use crate::nats::{DlqConsumerService, RouterConsumerService, SinkConsumerService};
use common::domain::{ArchiveStore, ColumnStore, ConversionStrategy, OutputChannel, StreamEmitter};
use common::nats::{
    ConsumeRequest, ConsumeResponse, ConsumerOptions, NatsClient, NatsConsumeLoggingLayer,
    NatsConsumeLoggingService, NatsConsumeTracingConfig, NatsConsumeTracingLayer,
    NatsConsumeTracingService, NatsStreamEmitter, TowerConsumer,
};
use hyperstream_runner::{AppProcess, BoxedResultFuture};
use std::sync::Arc;
use std::time::Duration;
use tower::{Service, ServiceBuilder};
use tracing::info;

type Layered<S> = NatsConsumeTracingService<NatsConsumeLoggingService<S>>;

/// Stores reached by the router consumers.
const ROUTED_CHANNELS: [(&str, OutputChannel); 3] = [
    ("router-enriched", OutputChannel::Enriched),
    ("router-events", OutputChannel::EventStore),
    ("router-alarms", OutputChannel::AlarmStore),
];

pub struct StorageWorkerConfig {
    /// Prefix of every durable consumer name created by this stage
    pub consumer_prefix: String,
    pub nats_batch_size: usize,
    pub nats_batch_wait: Duration,
    pub max_deliver: Option<i64>,
}

/// Storage stage: routers fanning packets out into sink writes, the sink
/// consumers for live and replayed writes, and the DLQ replayer.
pub struct StorageWorker {
    routers: Vec<(&'static str, TowerConsumer<Layered<RouterConsumerService>>)>,
    sink: TowerConsumer<Layered<SinkConsumerService>>,
    replay: TowerConsumer<Layered<SinkConsumerService>>,
    dlq: TowerConsumer<Layered<DlqConsumerService>>,
}

fn layered<S>(operation: &str, service: S) -> Layered<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>,
{
    ServiceBuilder::new()
        .layer(NatsConsumeTracingLayer::new(NatsConsumeTracingConfig::new(
            operation,
        )))
        .layer(NatsConsumeLoggingLayer::new())
        .service(service)
}

impl StorageWorker {
    pub async fn new(
        project_id: u64,
        column_store: Arc<dyn ColumnStore>,
        archive_store: Arc<dyn ArchiveStore>,
        nats_client: Arc<NatsClient>,
        config: StorageWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!(project_id, "initializing storage worker");

        let emitter: Arc<dyn StreamEmitter> = Arc::new(NatsStreamEmitter::new(
            nats_client.create_publisher_client(),
            "storage",
        ));
        let options = |stream: &str, name: &str, filter: String| {
            ConsumerOptions::new(
                stream,
                format!("{}-{}-{}", config.consumer_prefix, name, project_id),
                filter,
            )
            .with_batch(config.nats_batch_size, config.nats_batch_wait)
            .with_max_deliver(config.max_deliver)
        };

        let router_service = Arc::new(RouterService::new(
            PacketRouter::new(),
            Arc::clone(&emitter),
        ));
        let mut routers = Vec::with_capacity(ROUTED_CHANNELS.len());
        for (name, channel) in ROUTED_CHANNELS {
            let consumer = TowerConsumer::new(
                nats_client.create_consumer_client(),
                options(channel.stream(), name, channel.subject(project_id)),
                layered(
                    "route_packet",
                    RouterConsumerService::new(Arc::clone(&router_service)),
                ),
            )
            .await?;
            routers.push((name, consumer));
        }

        let sinks = Arc::new(RecoverableSink::for_every_strategy(
            Arc::new(ColumnStoreSinkWriter::new(column_store)),
            Arc::new(ArchiveSinkWriter::new(archive_store)),
            Arc::clone(&emitter),
        ));
        let sink_stream = OutputChannel::Sink(ConversionStrategy::Telemetry).stream();
        let replay_stream = OutputChannel::Replay(ConversionStrategy::Telemetry).stream();

        let sink = TowerConsumer::new(
            nats_client.create_consumer_client(),
            options(
                sink_stream,
                "sink",
                format!("{}.*.{}", sink_stream, project_id),
            ),
            layered("store_write", SinkConsumerService::new(Arc::clone(&sinks))),
        )
        .await?;

        let replay = TowerConsumer::new(
            nats_client.create_consumer_client(),
            options(
                replay_stream,
                "replay",
                format!("{}.*.{}", replay_stream, project_id),
            ),
            layered("store_replayed_write", SinkConsumerService::new(sinks)),
        )
        .await?;

        let dlq = TowerConsumer::new(
            nats_client.create_consumer_client(),
            options(
                OutputChannel::Dlq.stream(),
                "dlq",
                OutputChannel::Dlq.subject(project_id),
            ),
            layered(
                "replay_dlq",
                DlqConsumerService::new(Arc::new(DlqReplayer::new(emitter))),
            ),
        )
        .await?;

        Ok(Self {
            routers,
            sink,
            replay,
            dlq,
        })
    }

    pub fn into_runner_processes(self) -> Vec<(&'static str, AppProcess)> {
        let mut processes: Vec<(&'static str, AppProcess)> = self
            .routers
            .into_iter()
            .map(|(name, consumer)| (name, boxed(consumer)))
            .collect();
        processes.push(("sink-consumer", boxed(self.sink)));
        processes.push(("replay-consumer", boxed(self.replay)));
        processes.push(("dlq-replayer", boxed(self.dlq)));
        processes
    }
}

fn boxed<S>(consumer: TowerConsumer<S>) -> AppProcess
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error> + Send + 'static,
    S::Future: Send + 'static,
{
    Box::new(move |ctx| -> BoxedResultFuture { Box::pin(async move { consumer.run(ctx).await }) })
}
