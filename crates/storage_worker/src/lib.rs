pub mod domain;
pub mod nats;
pub mod storage_worker;

pub use domain::*;
pub use nats::*;
pub use storage_worker::*;
