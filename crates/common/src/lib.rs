pub mod clickhouse;
pub mod domain;
pub mod nats;
pub mod pipeline_config;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use self::clickhouse::*;
pub use domain::*;
pub use nats::*;
pub use pipeline_config::*;
pub use telemetry::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockArchiveStore;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockColumnStore;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockRuleStateRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockStreamEmitter;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamConsumer;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamPublisher;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockPullConsumer;
