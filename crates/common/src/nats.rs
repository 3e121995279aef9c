mod client;
mod emitter;
mod middleware;
mod object_store;
mod trace_context;
mod tower_consumer;
mod traits;

pub use client::*;
pub use emitter::*;
pub use middleware::*;
pub use object_store::*;
pub use trace_context::*;
pub use tower_consumer::*;
pub use traits::*;
