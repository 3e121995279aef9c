use crate::domain::{RecoverableSink, SinkOutcome, WriteOrigin};
use common::domain::{
    project_id_from_subject, strategy_from_subject, ConversionStrategy, SinkWrite,
    REPLAY_SOURCE_ID, SOURCE_ID_HEADER,
};
use common::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::warn;

const REPLAY_SUBJECT_PREFIX: &str = "replay.";

/// Tower service writing `sink.<tag>.<projectId>` and `replay.<tag>.<projectId>`
/// messages through the recoverable sink of their strategy.
#[derive(Clone)]
pub struct SinkConsumerService {
    sinks: Arc<HashMap<ConversionStrategy, RecoverableSink>>,
}

impl SinkConsumerService {
    pub fn new(sinks: Arc<HashMap<ConversionStrategy, RecoverableSink>>) -> Self {
        Self { sinks }
    }
}

fn origin_of(req: &ConsumeRequest) -> WriteOrigin {
    if req.subject.starts_with(REPLAY_SUBJECT_PREFIX)
        || req.header(SOURCE_ID_HEADER) == Some(REPLAY_SOURCE_ID)
    {
        WriteOrigin::Replay
    } else {
        WriteOrigin::Live
    }
}

impl Service<ConsumeRequest> for SinkConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let sinks = Arc::clone(&self.sinks);

        Box::pin(async move {
            let (strategy, project_id) = match strategy_from_subject(&req.subject)
                .and_then(|s| Ok((s, project_id_from_subject(&req.subject)?)))
            {
                Ok(parsed) => parsed,
                Err(e) => return Ok(ConsumeResponse::term(e.to_string())),
            };
            let Some(sink) = sinks.get(&strategy) else {
                return Ok(ConsumeResponse::term(format!("no sink for {}", strategy)));
            };
            let write = match SinkWrite::decode(&req.payload) {
                Ok(write) => write,
                Err(e) => {
                    warn!(subject = %req.subject, error = %e, "undecodable sink write");
                    return Ok(ConsumeResponse::term(e.to_string()));
                }
            };

            let response = match sink.write(project_id, write, origin_of(&req)).await {
                SinkOutcome::Written | SinkOutcome::Captured => ConsumeResponse::ack(),
                SinkOutcome::Retry(e) => ConsumeResponse::nak(e.to_string()),
                SinkOutcome::Rejected(e) => ConsumeResponse::term(e.to_string()),
            };
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MockSinkWriter;
    use async_nats::HeaderMap;
    use bytes::Bytes;
    use common::domain::{DomainError, OutputChannel};
    use common::testing::RecordingEmitter;

    fn rule_state() -> SinkWrite {
        SinkWrite::RuleState {
            rule_id: 3,
            fired: true,
            last_fired_timestamp: Some(9),
            version: 9,
        }
    }

    fn consumer_service(
        writer: MockSinkWriter,
        emitter: Arc<RecordingEmitter>,
    ) -> SinkConsumerService {
        let writer = Arc::new(writer);
        SinkConsumerService::new(Arc::new(RecoverableSink::for_every_strategy(
            writer.clone(),
            writer,
            emitter,
        )))
    }

    fn request(subject: &str, headers: Option<HeaderMap>) -> ConsumeRequest {
        ConsumeRequest::new(
            subject.to_string(),
            Bytes::from(rule_state().encode().unwrap()),
            headers,
        )
    }

    fn failing_writer() -> MockSinkWriter {
        let mut writer = MockSinkWriter::new();
        writer
            .expect_write()
            .returning(|_, _| Err(DomainError::StorageError("down".to_string())));
        writer
    }

    #[tokio::test]
    async fn test_writes_live_message() {
        let mut writer = MockSinkWriter::new();
        writer
            .expect_write()
            .withf(|project_id: &u64, write: &SinkWrite| *project_id == 8 && *write == rule_state())
            .times(1)
            .returning(|_, _| Ok(()));

        let response = consumer_service(writer, Arc::new(RecordingEmitter::new()))
            .call(request("sink.rule-state.8", None))
            .await
            .unwrap();
        assert!(response.is_ack());
    }

    #[tokio::test]
    async fn test_live_failure_captured_and_acked() {
        let emitter = Arc::new(RecordingEmitter::new());
        let response = consumer_service(failing_writer(), emitter.clone())
            .call(request("sink.rule-state.8", None))
            .await
            .unwrap();

        assert!(response.is_ack());
        assert_eq!(emitter.count(OutputChannel::Dlq), 1);
    }

    #[tokio::test]
    async fn test_replayed_failure_is_nakked() {
        let emitter = Arc::new(RecordingEmitter::new());
        let response = consumer_service(failing_writer(), emitter.clone())
            .call(request("replay.rule-state.8", None))
            .await
            .unwrap();

        assert!(response.is_nak());
        assert!(emitter.messages().is_empty());
    }

    #[tokio::test]
    async fn test_replay_source_header_marks_replay() {
        let mut headers = HeaderMap::new();
        headers.insert(SOURCE_ID_HEADER, REPLAY_SOURCE_ID);
        let emitter = Arc::new(RecordingEmitter::new());
        let response = consumer_service(failing_writer(), emitter.clone())
            .call(request("sink.rule-state.8", Some(headers)))
            .await
            .unwrap();

        assert!(response.is_nak());
        assert_eq!(emitter.count(OutputChannel::Dlq), 0);
    }

    #[tokio::test]
    async fn test_terms_unknown_subject_and_bad_payload() {
        let service = consumer_service(MockSinkWriter::new(), Arc::new(RecordingEmitter::new()));

        let unknown = service
            .clone()
            .call(request("sink.hbase.8", None))
            .await
            .unwrap();
        assert!(unknown.is_term());

        let garbage = service
            .clone()
            .call(ConsumeRequest::new(
                "sink.event.8".to_string(),
                Bytes::from_static(b"{"),
                None,
            ))
            .await
            .unwrap();
        assert!(garbage.is_term());
    }
}
