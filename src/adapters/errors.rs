//! Exchange adapter error types
//!
//! All feed-related errors are wrapped in the ExchangeError enum
//! which implements thiserror for consistent error handling.

use thiserror::Error;

/// Exchange-specific error types for feed operations
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Connection to exchange failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP Upgrade handshake was rejected or could not complete
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Malformed WebSocket frame header
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame payload larger than the configured maximum
    #[error("Frame payload of {len} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { len: u64, max: u64 },

    /// Subscription to market data failed
    #[error("Subscription failed for {symbol}: {reason}")]
    SubscriptionFailed { symbol: String, reason: String },

    /// Network operation timed out
    #[error("Network timeout after {0}ms")]
    NetworkTimeout(u64),

    /// Invalid or unexpected response from exchange
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Request signing failed (bad secret encoding, etc.)
    #[error("Signing error: {0}")]
    Signing(String),

    /// Lookup of an instrument that was never registered
    #[error("Instrument not found: {0}")]
    NotFound(String),

    /// Transport I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExchangeError {
    /// True for errors that end the current connection and require a reconnect
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ExchangeError::ConnectionFailed(_)
                | ExchangeError::HandshakeFailed(_)
                | ExchangeError::NetworkTimeout(_)
                | ExchangeError::Io(_)
        )
    }
}

/// Result type alias for exchange operations
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
