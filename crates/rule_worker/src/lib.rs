pub mod domain;
pub mod nats;
pub mod rule_worker;

pub use domain::*;
pub use nats::*;
pub use rule_worker::*;
