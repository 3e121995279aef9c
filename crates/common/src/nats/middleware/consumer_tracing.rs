use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::domain::{MESSAGE_KEY_HEADER, SOURCE_ID_HEADER};
use crate::nats::trace_context::extract_trace_context;
use crate::nats::{ConsumeRequest, ConsumeResponse};
use tower::{Layer, Service};
use tracing::{field, info_span, Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Configuration for the consume tracing middleware
#[derive(Clone, Debug, Default)]
pub struct NatsConsumeTracingConfig {
    /// Operation name recorded on the consume span
    pub operation: String,
}

impl NatsConsumeTracingConfig {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

/// Tower layer opening one span per consumed message, parented on the publisher's trace
#[derive(Clone, Default)]
pub struct NatsConsumeTracingLayer {
    config: NatsConsumeTracingConfig,
}

impl NatsConsumeTracingLayer {
    pub fn new(config: NatsConsumeTracingConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for NatsConsumeTracingLayer {
    type Service = NatsConsumeTracingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsConsumeTracingService {
            inner: service,
            config: self.config.clone(),
        }
    }
}

#[derive(Clone)]
pub struct NatsConsumeTracingService<S> {
    inner: S,
    config: NatsConsumeTracingConfig,
}

impl<S> Service<ConsumeRequest> for NatsConsumeTracingService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let span = info_span!(
            target: "nats",
            "nats_consume",
            otel.name = %self.config.operation,
            messaging.system = "nats",
            messaging.operation = "receive",
            messaging.destination.name = %req.subject,
            messaging.message.body.size = req.payload.len(),
            messaging.message.key = req.header(MESSAGE_KEY_HEADER).unwrap_or(""),
            messaging.source.id = req.header(SOURCE_ID_HEADER).unwrap_or(""),
            messaging.outcome = field::Empty,
            otel.status_code = field::Empty,
        );

        if let Some(headers) = &req.headers {
            span.set_parent(extract_trace_context(headers));
        }

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;

                match &result {
                    Ok(response) => {
                        let current = Span::current();
                        current.record("messaging.outcome", response.outcome());
                        current.record(
                            "otel.status_code",
                            if response.is_ack() { "OK" } else { "ERROR" },
                        );
                    }
                    Err(e) => {
                        Span::current().record("otel.status_code", "ERROR");
                        tracing::error!(error = %e, "nats consume failed");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
