pub mod cayenne_lpp;
mod decoder;
mod deserializer;
mod error;
mod ingest_service;
mod schema;

pub use cayenne_lpp::CayenneLppDecoder;
pub use decoder::*;
pub use deserializer::*;
pub use error::*;
pub use ingest_service::*;
pub use schema::*;
