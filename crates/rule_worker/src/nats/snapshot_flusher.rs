use crate::domain::RuleEvaluationService;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Periodically writes rule facts changed since the last snapshot.
pub struct SnapshotFlusher {
    service: Arc<RuleEvaluationService>,
    period: Duration,
}

impl SnapshotFlusher {
    pub fn new(service: Arc<RuleEvaluationService>, period: Duration) -> Self {
        Self { service, period }
    }

    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        debug!(period = ?self.period, "starting rule state flusher");
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.service.flush_dirty().await {
                        warn!(error = %e, "failed to flush rule state, will retry");
                    }
                }
            }
        }

        debug!("rule state flusher stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{
        ConversionStrategy, FieldValue, OutputChannel, Packet, PacketField, TrafficTier,
    };
    use common::testing::RecordingEmitter;
    use common::PipelineConfig;
    use std::collections::{BTreeMap, BTreeSet};

    #[tokio::test]
    async fn test_flushes_dirty_facts_until_cancelled() {
        let config = PipelineConfig {
            project_id: 2,
            rule_sources: BTreeMap::from([(
                1,
                r#"{"id": 1, "name": "any", "condition": "true"}"#.to_string(),
            )]),
            event_rules: BTreeSet::from([1]),
            ..Default::default()
        };
        let emitter = Arc::new(RecordingEmitter::new());
        let service =
            Arc::new(RuleEvaluationService::open(&config, vec![], emitter.clone()).unwrap());

        let packet = Packet {
            id: 4,
            name: "level".to_string(),
            device_id: 1,
            project_id: 2,
            traffic_tier: TrafficTier::Low,
            timestamp_field: "timestamp".to_string(),
            fields: vec![PacketField::new(1, "timestamp", FieldValue::Timestamp(1))],
            fired_rules: BTreeSet::new(),
        };
        service.handle(packet, 50).await.unwrap();

        let ctx = CancellationToken::new();
        let stopper = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(35)).await;
            stopper.cancel();
        });

        SnapshotFlusher::new(service, Duration::from_millis(10))
            .run(ctx)
            .await
            .unwrap();

        assert_eq!(
            emitter.count(OutputChannel::Sink(ConversionStrategy::RuleState)),
            1
        );
    }
}
