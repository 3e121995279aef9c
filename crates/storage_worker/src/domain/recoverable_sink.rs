use crate::domain::SinkWriter;
use common::domain::{
    ConversionStrategy, DomainError, OutboundMessage, OutputChannel, SinkWrite, StreamEmitter,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

pub const RECOVERABLE_SINK_SOURCE_ID: &str = "recoverable-sink";

/// Where a sink input came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    Live,
    /// Re-emitted by the DLQ replayer
    Replay,
}

#[derive(Debug)]
pub enum SinkOutcome {
    Written,
    /// The write failed and was captured into the DLQ
    Captured,
    /// The write failed and must be redelivered by the broker
    Retry(DomainError),
    /// The write can never succeed
    Rejected(DomainError),
}

/// Storage stage of one strategy with DLQ capture on failure.
pub struct RecoverableSink {
    strategy: ConversionStrategy,
    writer: Arc<dyn SinkWriter>,
    emitter: Arc<dyn StreamEmitter>,
}

impl RecoverableSink {
    pub fn new(
        strategy: ConversionStrategy,
        writer: Arc<dyn SinkWriter>,
        emitter: Arc<dyn StreamEmitter>,
    ) -> Self {
        Self {
            strategy,
            writer,
            emitter,
        }
    }

    /// One sink per strategy: archive windows on the archive writer, the rest on the column writer.
    pub fn for_every_strategy(
        column_writer: Arc<dyn SinkWriter>,
        archive_writer: Arc<dyn SinkWriter>,
        emitter: Arc<dyn StreamEmitter>,
    ) -> HashMap<ConversionStrategy, RecoverableSink> {
        ConversionStrategy::ALL
            .into_iter()
            .map(|strategy| {
                let writer = if strategy.window().is_some() {
                    Arc::clone(&archive_writer)
                } else {
                    Arc::clone(&column_writer)
                };
                (
                    strategy,
                    RecoverableSink::new(strategy, writer, Arc::clone(&emitter)),
                )
            })
            .collect()
    }

    pub fn strategy(&self) -> ConversionStrategy {
        self.strategy
    }

    #[instrument(skip(self, write), fields(strategy = %self.strategy))]
    pub async fn write(&self, project_id: u64, write: SinkWrite, origin: WriteOrigin) -> SinkOutcome {
        if write.strategy() != self.strategy {
            return SinkOutcome::Rejected(DomainError::InvalidPacket(format!(
                "{} write delivered to the {} sink",
                write.strategy(),
                self.strategy
            )));
        }

        let err = match self.writer.write(project_id, &write).await {
            Ok(()) => {
                debug!(project_id, origin = ?origin, "stored write");
                return SinkOutcome::Written;
            }
            Err(e) if !e.is_transient() => {
                warn!(project_id, error = %e, "write rejected by storage");
                return SinkOutcome::Rejected(e);
            }
            Err(e) => e,
        };

        match origin {
            WriteOrigin::Replay => {
                warn!(project_id, error = %err, "replayed write failed, leaving it to redelivery");
                SinkOutcome::Retry(err)
            }
            WriteOrigin::Live => {
                warn!(project_id, error = %err, "write failed, capturing into the DLQ");
                match self.capture(project_id, &write).await {
                    Ok(()) => SinkOutcome::Captured,
                    Err(capture_err) => {
                        error!(project_id, error = %capture_err, "failed to capture write into the DLQ");
                        SinkOutcome::Retry(capture_err)
                    }
                }
            }
        }
    }

    async fn capture(&self, project_id: u64, write: &SinkWrite) -> Result<(), DomainError> {
        let envelope = write.capture(project_id);
        self.emitter
            .emit(
                OutboundMessage::new(OutputChannel::Dlq, project_id, envelope.encode()?)
                    .with_key(self.strategy.tag())
                    .with_source(RECOVERABLE_SINK_SOURCE_ID),
            )
            .await
    }
}
