use crate::domain::{DlqReplayer, ReplayOutcome};
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Tower service running the DLQ replayer over `dlq.<projectId>` envelopes.
#[derive(Clone)]
pub struct DlqConsumerService {
    replayer: Arc<DlqReplayer>,
}

impl DlqConsumerService {
    pub fn new(replayer: Arc<DlqReplayer>) -> Self {
        Self { replayer }
    }
}

impl Service<ConsumeRequest> for DlqConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let replayer = Arc::clone(&self.replayer);

        Box::pin(async move {
            let response = match replayer.execute(&req.payload).await {
                ReplayOutcome::Replayed(_) => ConsumeResponse::ack(),
                ReplayOutcome::Rejected(e) => ConsumeResponse::term(e.to_string()),
                ReplayOutcome::Retry(e) => ConsumeResponse::nak(e.to_string()),
            };
            Ok(response)
        })
    }
}
