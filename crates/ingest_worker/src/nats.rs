mod heartbeat;
mod ingest_service;

pub use heartbeat::*;
pub use ingest_service::*;
