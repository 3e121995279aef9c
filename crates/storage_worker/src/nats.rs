mod dlq_service;
mod router_service;
mod sink_service;

pub use dlq_service::*;
pub use router_service::*;
pub use sink_service::*;
