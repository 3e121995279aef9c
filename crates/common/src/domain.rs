mod channel;
mod dlq;
mod emitter;
pub mod encoding;
mod error_record;
mod fired_rule;
mod packet;
mod result;
mod sink_write;
mod storage_key;
mod stores;
mod tier;

pub use channel::*;
pub use dlq::*;
pub use emitter::*;
pub use error_record::*;
pub use fired_rule::*;
pub use packet::*;
pub use result::*;
pub use sink_write::*;
pub use storage_key::*;
pub use stores::*;
pub use tier::*;
