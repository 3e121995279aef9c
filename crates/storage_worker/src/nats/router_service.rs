use crate::domain::RouterService;
use chrono::Utc;
use common::domain::project_id_from_subject;
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, warn};

/// Tower service feeding `enriched`, `events` and `alarms` messages to the router.
#[derive(Clone)]
pub struct RouterConsumerService {
    domain_service: Arc<RouterService>,
}

impl RouterConsumerService {
    pub fn new(domain_service: Arc<RouterService>) -> Self {
        Self { domain_service }
    }
}

impl Service<ConsumeRequest> for RouterConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let domain_service = Arc::clone(&self.domain_service);

        Box::pin(async move {
            let project_id = match project_id_from_subject(&req.subject) {
                Ok(project_id) => project_id,
                Err(e) => return Ok(ConsumeResponse::term(e.to_string())),
            };

            match domain_service
                .handle(project_id, &req.payload, Utc::now().timestamp_millis())
                .await
            {
                Ok(count) => {
                    debug!(subject = %req.subject, writes = count, "routed message");
                    Ok(ConsumeResponse::ack())
                }
                Err(e) => {
                    warn!(subject = %req.subject, error = %e, "failed to publish storage writes");
                    Ok(ConsumeResponse::nak(e.to_string()))
                }
            }
        })
    }
}
