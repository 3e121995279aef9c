use common::domain::{
    ConversionStrategy, DlqEnvelope, DlqError, DomainError, OutboundMessage, OutputChannel,
    SinkWrite, StreamEmitter, REPLAY_SOURCE_ID,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Debug)]
pub enum ReplayOutcome {
    Replayed(ConversionStrategy),
    /// Envelope can never be replayed; acknowledge and drop it
    Rejected(DlqError),
    /// Re-emit failed; leave the envelope for redelivery
    Retry(DomainError),
}

/// Rebuilds captured writes from DLQ envelopes and re-emits them to the
/// replay channel of their original sink.
pub struct DlqReplayer {
    emitter: Arc<dyn StreamEmitter>,
}

impl DlqReplayer {
    pub fn new(emitter: Arc<dyn StreamEmitter>) -> Self {
        Self { emitter }
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn execute(&self, payload: &[u8]) -> ReplayOutcome {
        let (project_id, write) = match DlqEnvelope::decode(payload)
            .and_then(|envelope| SinkWrite::replay(&envelope))
        {
            Ok(replayed) => replayed,
            Err(e) => {
                warn!(error = %e, "dropping unreplayable DLQ envelope");
                return ReplayOutcome::Rejected(e);
            }
        };

        let strategy = write.strategy();
        match self.re_emit(project_id, &write).await {
            Ok(()) => {
                debug!(project_id, strategy = %strategy, "replayed DLQ envelope");
                ReplayOutcome::Replayed(strategy)
            }
            Err(e) => {
                warn!(project_id, strategy = %strategy, error = %e, "failed to re-emit DLQ envelope");
                ReplayOutcome::Retry(e)
            }
        }
    }

    async fn re_emit(&self, project_id: u64, write: &SinkWrite) -> Result<(), DomainError> {
        self.emitter
            .emit(
                OutboundMessage::new(
                    OutputChannel::Replay(write.strategy()),
                    project_id,
                    write.encode()?,
                )
                .with_source(REPLAY_SOURCE_ID),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{AlarmState, RetentionWindow};
    use common::testing::RecordingEmitter;

    #[tokio::test]
    async fn test_replays_to_original_strategy() {
        let emitter = Arc::new(RecordingEmitter::new());
        let write = SinkWrite::Alarm {
            row_key: "Alarm.3".to_string(),
            device_id: 3,
            timestamp: 10,
            alarm_state: AlarmState::Up,
            payload: "{}".to_string(),
        };
        let envelope = write.capture(6).encode().unwrap();

        let outcome = DlqReplayer::new(emitter.clone()).execute(&envelope).await;
        assert!(matches!(
            outcome,
            ReplayOutcome::Replayed(ConversionStrategy::Alarm)
        ));

        let replayed = emitter.messages();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].subject(), "replay.alarm.6");
        assert_eq!(replayed[0].source.as_deref(), Some(REPLAY_SOURCE_ID));
        assert_eq!(SinkWrite::decode(&replayed[0].payload).unwrap(), write);
    }

    #[tokio::test]
    async fn test_archive_envelope_replays_to_its_window() {
        let emitter = Arc::new(RecordingEmitter::new());
        let write = SinkWrite::Archive {
            window: RetentionWindow::Semester,
            bucket: "2024/S1".to_string(),
            row_key: "HPACKET.1".to_string(),
            timestamp: 10,
            payload: "{}".to_string(),
        };

        DlqReplayer::new(emitter.clone())
            .execute(&write.capture(2).encode().unwrap())
            .await;
        assert_eq!(emitter.messages()[0].subject(), "replay.hdfs-semester.2");
    }

    #[tokio::test]
    async fn test_unknown_strategy_is_rejected() {
        let emitter = Arc::new(RecordingEmitter::new());
        let outcome = DlqReplayer::new(emitter.clone())
            .execute(br#"{"senderStrategy": "mystery", "projectId": "1"}"#)
            .await;

        assert!(matches!(
            outcome,
            ReplayOutcome::Rejected(DlqError::UnknownStrategy(_))
        ));
        assert!(emitter.messages().is_empty());
    }

    #[tokio::test]
    async fn test_missing_strategy_is_rejected() {
        let outcome = DlqReplayer::new(Arc::new(RecordingEmitter::new()))
            .execute(br#"{"projectId": "1"}"#)
            .await;
        assert!(matches!(
            outcome,
            ReplayOutcome::Rejected(DlqError::MissingStrategy)
        ));
    }

    #[tokio::test]
    async fn test_emit_failure_requests_retry() {
        let emitter = Arc::new(
            RecordingEmitter::new().fail_on(OutputChannel::Replay(ConversionStrategy::Error)),
        );
        let write = SinkWrite::Error {
            timestamp: 1,
            message: "boom".to_string(),
            original_payload: "x".to_string(),
        };
        let outcome = DlqReplayer::new(emitter)
            .execute(&write.capture(1).encode().unwrap())
            .await;
        assert!(matches!(outcome, ReplayOutcome::Retry(_)));
    }
}
