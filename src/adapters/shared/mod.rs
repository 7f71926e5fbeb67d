//! Shared helpers for the feed adapter
//!
//! Transport abstraction, TLS connector and backoff logic.

pub mod reconnect;
pub mod transport;

pub use reconnect::{retry_with_backoff, sleep_or_cancel, ReconnectConfig};
pub use transport::{Connector, TlsConnector, Transport};
