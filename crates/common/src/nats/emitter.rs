use crate::domain::{DomainError, DomainResult, OutboundMessage, StreamEmitter};
use crate::nats::{
    JetStreamPublisher, LayeredPublisher, NatsPublisherBuilder, NatsTracingConfig, PublishRequest,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// `StreamEmitter` backed by JetStream, with tracing and logging publish layers.
pub struct NatsStreamEmitter {
    publisher: LayeredPublisher,
}

impl NatsStreamEmitter {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, stage: &str) -> Self {
        debug!(stage = %stage, "initialized NatsStreamEmitter");

        let publisher = NatsPublisherBuilder::new(jetstream)
            .with_tracing(NatsTracingConfig::new(stage))
            .with_logging()
            .build();

        Self { publisher }
    }
}

#[async_trait]
impl StreamEmitter for NatsStreamEmitter {
    async fn emit(&self, message: OutboundMessage) -> DomainResult<()> {
        self.publisher
            .send(PublishRequest::from(message))
            .await
            .map_err(|e| DomainError::PublishError(format!("{:#}", e)))?;
        Ok(())
    }
}
