mod client;
mod column_store;
mod rule_state_repository;

pub use client::*;
pub use column_store::*;
pub use rule_state_repository::*;
