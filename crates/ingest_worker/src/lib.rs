pub mod domain;
pub mod ingest_worker;
pub mod nats;

pub use domain::*;
pub use ingest_worker::*;
pub use nats::*;
