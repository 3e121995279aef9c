mod dlq_replayer;
mod recoverable_sink;
mod router;
mod router_service;
mod sink_writer;

pub use dlq_replayer::*;
pub use recoverable_sink::*;
pub use router::*;
pub use router_service::*;
pub use sink_writer::*;
