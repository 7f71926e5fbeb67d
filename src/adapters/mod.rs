//! Exchange adapters module
//!
//! - `errors`: shared `ExchangeError` type
//! - `shared`: transport abstraction, TLS connector, backoff
//! - `coinbase`: feed message types, signing, REST price seed

pub mod coinbase;
pub mod errors;
pub mod shared;

pub use errors::{ExchangeError, ExchangeResult};
