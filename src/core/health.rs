//! Connection state shared between the supervisor and observers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Subscribing,
    Streaming,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Subscribing => "subscribing",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Shared connection health; clones share the same counters
#[derive(Debug, Clone, Default)]
pub struct ConnectionHealth {
    state: Arc<RwLock<ConnectionState>>,
    /// Sessions that reached `Streaming`
    sessions: Arc<AtomicU64>,
    /// Sessions that ended and triggered a reconnect
    disconnects: Arc<AtomicU64>,
    /// Frames received across all sessions
    frames: Arc<AtomicU64>,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write().await;
        if *current != state {
            tracing::debug!(from = %*current, to = %state, "Connection state change");
            *current = state;
        }
    }

    pub fn record_session(&self) {
        self.sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_state() {
        let health = ConnectionHealth::new();
        let observer = health.clone();
        assert_eq!(observer.state().await, ConnectionState::Disconnected);

        health.set_state(ConnectionState::Streaming).await;
        health.record_session();
        health.record_frame();
        health.record_frame();

        assert_eq!(observer.state().await, ConnectionState::Streaming);
        assert_eq!(observer.sessions(), 1);
        assert_eq!(observer.frames(), 2);
        assert_eq!(observer.disconnects(), 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Handshaking.to_string(), "handshaking");
    }
}
