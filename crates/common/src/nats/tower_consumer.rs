use crate::nats::{ConsumeRequest, ConsumeResponse, JetStreamConsumer, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, AckKind};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

/// Durable pull consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub stream_name: String,
    pub consumer_name: String,
    pub filter_subject: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    /// Redelivery ceiling enforced by JetStream; `None` keeps the server default (unbounded).
    pub max_deliver: Option<i64>,
}

impl ConsumerOptions {
    pub fn new(
        stream_name: impl Into<String>,
        consumer_name: impl Into<String>,
        filter_subject: impl Into<String>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            consumer_name: consumer_name.into(),
            filter_subject: filter_subject.into(),
            batch_size: 10,
            max_wait: Duration::from_secs(5),
            max_deliver: None,
        }
    }

    pub fn with_batch(mut self, batch_size: usize, max_wait: Duration) -> Self {
        self.batch_size = batch_size;
        self.max_wait = max_wait;
        self
    }

    pub fn with_max_deliver(mut self, max_deliver: Option<i64>) -> Self {
        self.max_deliver = max_deliver;
        self
    }

    fn pull_config(&self) -> jetstream::consumer::pull::Config {
        jetstream::consumer::pull::Config {
            name: Some(self.consumer_name.clone()),
            durable_name: Some(self.consumer_name.clone()),
            filter_subject: self.filter_subject.clone(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            max_deliver: self.max_deliver.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// A NATS consumer that drives one message at a time through a Tower service stack.
///
/// Each message is converted to an owned `ConsumeRequest`; the returned
/// `ConsumeResponse` decides between ack, nak (redeliver) and term (drop).
pub struct TowerConsumer<S> {
    consumer: Box<dyn PullConsumer>,
    options: ConsumerOptions,
    service: S,
}

impl<S> TowerConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error> + Send + 'static,
    S::Future: Send + 'static,
{
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        options: ConsumerOptions,
        service: S,
    ) -> Result<Self> {
        debug!(
            stream = %options.stream_name,
            consumer = %options.consumer_name,
            filter_subject = %options.filter_subject,
            max_deliver = ?options.max_deliver,
            "creating tower nats consumer"
        );

        let consumer = jetstream
            .create_consumer(options.pull_config(), &options.stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Self {
            consumer,
            options,
            service,
        })
    }

    /// Run the consumer loop until cancellation
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        debug!(
            stream = %self.options.stream_name,
            consumer = %self.options.consumer_name,
            "starting tower nats consumer"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(
                        stream = %self.options.stream_name,
                        consumer = %self.options.consumer_name,
                        "received shutdown signal, stopping consumer"
                    );
                    break;
                }
                result = self.fetch_and_process_batch() => {
                    if let Err(e) = result {
                        error!(
                            stream = %self.options.stream_name,
                            consumer = %self.options.consumer_name,
                            error = %e,
                            "error processing batch"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        debug!(
            stream = %self.options.stream_name,
            consumer = %self.options.consumer_name,
            "consumer stopped gracefully"
        );
        Ok(())
    }

    async fn fetch_and_process_batch(&mut self) -> Result<()> {
        let raw_messages = self
            .consumer
            .fetch_messages(self.options.batch_size, self.options.max_wait)
            .await?;

        if raw_messages.is_empty() {
            debug!("no messages in batch");
            return Ok(());
        }

        debug!(message_count = raw_messages.len(), "received message batch");

        for msg in &raw_messages {
            let request = ConsumeRequest::new(
                msg.subject.to_string(),
                Bytes::copy_from_slice(&msg.payload),
                msg.headers.clone(),
            );

            let response = self.process(request).await;

            let (kind, label) = match &response {
                ConsumeResponse::Ack => (AckKind::Ack, "acknowledge"),
                ConsumeResponse::Nak(reason) => {
                    warn!(
                        subject = %msg.subject,
                        reason = reason.as_deref().unwrap_or(""),
                        "rejecting message for redelivery"
                    );
                    (AckKind::Nak(None), "reject")
                }
                ConsumeResponse::Term(reason) => {
                    warn!(
                        subject = %msg.subject,
                        reason = reason.as_deref().unwrap_or(""),
                        "terminating unprocessable message"
                    );
                    (AckKind::Term, "terminate")
                }
            };

            if let Err(e) = msg.ack_with(kind).await {
                error!(
                    subject = %msg.subject,
                    error = %e,
                    "failed to {label} message"
                );
            }
        }

        Ok(())
    }

    async fn process(&mut self, request: ConsumeRequest) -> ConsumeResponse {
        let subject = request.subject.clone();
        let result = match self.service.ready().await {
            Ok(service) => service.call(request).await,
            Err(e) => Err(e),
        };

        result.unwrap_or_else(|e| {
            error!(subject = %subject, error = %e, "service error processing message");
            ConsumeResponse::nak(e.to_string())
        })
    }
}
