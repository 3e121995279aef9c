mod alarm;
mod cel;
mod dispatcher;
mod error;
mod evaluation_service;
mod rule;
mod session;

pub use alarm::*;
pub use cel::*;
pub use dispatcher::*;
pub use error::*;
pub use evaluation_service::*;
pub use rule::*;
pub use session::*;
