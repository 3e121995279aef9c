use crate::domain::{IngestInput, IngestService};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Drives the deserializer's tick input on a fixed period.
pub struct HeartbeatTicker {
    service: Arc<IngestService>,
    period: Duration,
}

impl HeartbeatTicker {
    pub fn new(service: Arc<IngestService>, period: Duration) -> Self {
        Self { service, period }
    }

    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        debug!(period = ?self.period, "starting heartbeat ticker");
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self
                        .service
                        .handle(IngestInput::Tick, Utc::now().timestamp_millis())
                        .await
                    {
                        warn!(error = %e, "failed to publish heartbeat");
                    }
                }
            }
        }

        debug!("heartbeat ticker stopped");
        Ok(())
    }
}
