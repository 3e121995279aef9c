use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::types::{PublishRequest, PublishResponse};
use super::{
    NatsPublishLoggingLayer, NatsPublishLoggingService, NatsPublishTracingLayer,
    NatsPublishTracingService, NatsTracingConfig,
};
use crate::nats::JetStreamPublisher;
use anyhow::Result;
use tower::{Service, ServiceBuilder, ServiceExt};

/// Innermost service: the acknowledged JetStream publish.
#[derive(Clone)]
pub struct NatsPublishService {
    publisher: Arc<dyn JetStreamPublisher>,
}

impl NatsPublishService {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self { publisher }
    }
}

impl Service<PublishRequest> for NatsPublishService {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let publisher = Arc::clone(&self.publisher);

        Box::pin(async move {
            publisher
                .publish_with_headers(req.subject.clone(), req.headers, req.payload)
                .await?;
            Ok(PublishResponse {
                subject: req.subject,
            })
        })
    }
}

pub struct NatsPublisherBuilder {
    publisher: Arc<dyn JetStreamPublisher>,
    tracing_config: Option<NatsTracingConfig>,
    with_logging: bool,
}

impl NatsPublisherBuilder {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self {
            publisher,
            tracing_config: None,
            with_logging: false,
        }
    }

    pub fn with_tracing(mut self, config: NatsTracingConfig) -> Self {
        self.tracing_config = Some(config);
        self
    }

    pub fn with_logging(mut self) -> Self {
        self.with_logging = true;
        self
    }

    /// Layer order (outermost first): Tracing -> Logging -> Publish
    pub fn build(self) -> LayeredPublisher {
        let inner = NatsPublishService::new(self.publisher);

        match (self.tracing_config, self.with_logging) {
            (Some(tracing_config), true) => LayeredPublisher::Both(
                ServiceBuilder::new()
                    .layer(NatsPublishTracingLayer::new(tracing_config))
                    .layer(NatsPublishLoggingLayer::new())
                    .service(inner),
            ),
            (Some(tracing_config), false) => LayeredPublisher::TracingOnly(
                ServiceBuilder::new()
                    .layer(NatsPublishTracingLayer::new(tracing_config))
                    .service(inner),
            ),
            (None, true) => LayeredPublisher::LoggingOnly(
                ServiceBuilder::new()
                    .layer(NatsPublishLoggingLayer::new())
                    .service(inner),
            ),
            (None, false) => LayeredPublisher::Bare(inner),
        }
    }
}

/// Concrete service type for every layer combination the builder produces.
#[derive(Clone)]
pub enum LayeredPublisher {
    Both(NatsPublishTracingService<NatsPublishLoggingService<NatsPublishService>>),
    TracingOnly(NatsPublishTracingService<NatsPublishService>),
    LoggingOnly(NatsPublishLoggingService<NatsPublishService>),
    Bare(NatsPublishService),
}

impl LayeredPublisher {
    /// Publishes through a clone of the stack, so callers only need `&self`.
    pub async fn send(&self, req: PublishRequest) -> Result<PublishResponse> {
        self.clone().oneshot(req).await
    }
}

impl Service<PublishRequest> for LayeredPublisher {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        match self {
            LayeredPublisher::Both(svc) => svc.poll_ready(cx),
            LayeredPublisher::TracingOnly(svc) => svc.poll_ready(cx),
            LayeredPublisher::LoggingOnly(svc) => svc.poll_ready(cx),
            LayeredPublisher::Bare(svc) => svc.poll_ready(cx),
        }
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        match self {
            LayeredPublisher::Both(svc) => svc.call(req),
            LayeredPublisher::TracingOnly(svc) => svc.call(req),
            LayeredPublisher::LoggingOnly(svc) => svc.call(req),
            LayeredPublisher::Bare(svc) => svc.call(req),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::MockJetStreamPublisher;
    use async_nats::HeaderMap;

    #[tokio::test]
    async fn test_layered_publisher_forwards_headers() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_publish_with_headers()
            .withf(|subject: &String, headers: &HeaderMap, payload: &bytes::Bytes| {
                subject == "events.1"
                    && headers.get("Message-Key").map(|v| v.as_str()) == Some("3")
                    && payload.as_ref() == b"{}"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let publisher = NatsPublisherBuilder::new(Arc::new(mock)).build();
        let request = PublishRequest::new("events.1", b"{}".to_vec()).with_header("Message-Key", "3");
        let response = publisher.send(request).await.unwrap();

        assert_eq!(response.subject, "events.1");
    }

    #[tokio::test]
    async fn test_layered_publisher_propagates_errors() {
        let mut mock = MockJetStreamPublisher::new();
        mock.expect_publish_with_headers()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("no responders")));

        let publisher = NatsPublisherBuilder::new(Arc::new(mock))
            .with_tracing(NatsTracingConfig::new("test"))
            .with_logging()
            .build();

        let err = publisher
            .send(PublishRequest::new("dlq.1", Vec::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no responders"));
    }
}
