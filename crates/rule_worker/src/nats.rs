mod rule_service;
mod snapshot_flusher;

pub use rule_service::*;
pub use snapshot_flusher::*;
