use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::domain::{project_id_from_subject, MESSAGE_KEY_HEADER, SOURCE_ID_HEADER};
use crate::nats::{ConsumeRequest, ConsumeResponse};
use tower::{Layer, Service};
use tracing::{debug, error, warn, Instrument, Span};

/// Tower layer logging the disposition of every consumed message.
///
/// Acks are logged at debug. Naks (redelivery) and terms (dropped for good)
/// are logged at warn with their reason.
#[derive(Clone, Default)]
pub struct NatsConsumeLoggingLayer;

impl NatsConsumeLoggingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for NatsConsumeLoggingLayer {
    type Service = NatsConsumeLoggingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NatsConsumeLoggingService { inner: service }
    }
}

#[derive(Clone)]
pub struct NatsConsumeLoggingService<S> {
    inner: S,
}

/// Message coordinates copied out before the request is moved into the inner service.
struct Delivery {
    subject: String,
    project_id: Option<u64>,
    key: String,
    source: String,
    payload_bytes: usize,
}

impl Delivery {
    fn of(req: &ConsumeRequest) -> Self {
        Self {
            subject: req.subject.clone(),
            project_id: project_id_from_subject(&req.subject).ok(),
            key: req.header(MESSAGE_KEY_HEADER).unwrap_or_default().to_string(),
            source: req.header(SOURCE_ID_HEADER).unwrap_or_default().to_string(),
            payload_bytes: req.payload.len(),
        }
    }
}

impl<S> Service<ConsumeRequest> for NatsConsumeLoggingService<S>
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
        let delivery = Delivery::of(&req);
        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();
                let Delivery {
                    subject,
                    project_id,
                    key,
                    source,
                    payload_bytes,
                } = delivery;

                match &result {
                    Ok(ConsumeResponse::Ack) => debug!(
                        subject = %subject,
                        project_id = ?project_id,
                        key = %key,
                        source = %source,
                        payload_bytes,
                        duration_ms = %duration_ms,
                        "consumed from {subject} in {duration_ms}ms [ack]"
                    ),
                    Ok(response @ (ConsumeResponse::Nak(reason) | ConsumeResponse::Term(reason))) => {
                        let outcome = response.outcome();
                        warn!(
                            subject = %subject,
                            project_id = ?project_id,
                            key = %key,
                            source = %source,
                            payload_bytes,
                            outcome,
                            reason = reason.as_deref().unwrap_or(""),
                            duration_ms = %duration_ms,
                            "consumed from {subject} in {duration_ms}ms [{outcome}]"
                        );
                    }
                    Err(e) => error!(
                        subject = %subject,
                        project_id = ?project_id,
                        key = %key,
                        payload_bytes,
                        duration_ms = %duration_ms,
                        error = %e,
                        "failed to consume from {subject} in {duration_ms}ms: {e}"
                    ),
                }

                result
            }
            .instrument(Span::current()),
        )
    }
}
