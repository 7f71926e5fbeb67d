//! Book feed: streaming market-data client
//!
//! - `ws`: client-side WebSocket framing over a raw byte stream
//! - `adapters`: transport, backoff and the exchange's wire messages
//! - `core`: order books, instrument registry, connection supervisor
//! - `config`: YAML configuration, constants and logging

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;
pub mod ws;

pub use error::AppError;
