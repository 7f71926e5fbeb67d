//! Connection supervisor
//!
//! Owns the feed connection for the lifetime of the client and drives
//! `connect -> handshake -> subscribe -> stream`, reconnecting after any
//! failure until the cancellation token fires. It is the only writer to the
//! order books; everything it reads goes through [`MessageRouter`].

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::adapters::coinbase::signing::Credentials;
use crate::adapters::coinbase::subscription::{
    build_private_subscribe_request, build_public_subscribe_request,
};
use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::shared::{sleep_or_cancel, Connector, ReconnectConfig, Transport};
use crate::config::FeedConfig;
use crate::ws::{
    encode_close, encode_control_frame, encode_text_frame, parse_close_payload, perform_handshake,
    FrameBuffer, FrameEvent, KeepAlive, Opcode, ReassemblyEngine,
};

use super::health::{ConnectionHealth, ConnectionState};
use super::registry::{InstrumentRegistry, PairKey};
use super::router::MessageRouter;

const READ_CHUNK_BYTES: usize = 16 * 1024;
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    /// Cancellation token fired
    Stopped,
    /// Connection failed or was lost; `streamed` is true if it got as far
    /// as streaming
    Lost { reason: String, streamed: bool },
}

impl SessionEnd {
    fn lost(reason: impl Into<String>) -> Self {
        SessionEnd::Lost {
            reason: reason.into(),
            streamed: true,
        }
    }
}

/// Per-connection read state
struct StreamState {
    frames: FrameBuffer,
    reassembly: ReassemblyEngine,
    keepalive: KeepAlive,
    transient_errors: u32,
}

pub struct ConnectionSupervisor<C: Connector> {
    connector: C,
    config: FeedConfig,
    reconnect: ReconnectConfig,
    registry: Arc<InstrumentRegistry>,
    router: MessageRouter,
    credentials: Option<Credentials>,
    health: ConnectionHealth,
    cancel: CancellationToken,
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(
        connector: C,
        config: FeedConfig,
        registry: Arc<InstrumentRegistry>,
        credentials: Option<Credentials>,
        health: ConnectionHealth,
        cancel: CancellationToken,
    ) -> Self {
        let reconnect = config.reconnect.to_reconnect_config();
        Self {
            connector,
            router: MessageRouter::new(registry.clone()),
            config,
            reconnect,
            registry,
            credentials,
            health,
            cancel,
        }
    }

    /// Run until cancelled. Never returns an error: every failure leads to
    /// a reconnect.
    pub async fn run(self) {
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            authenticated = self.credentials.is_some(),
            "Connection supervisor started"
        );
        let mut failures: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.run_session().await {
                SessionEnd::Stopped => break,
                SessionEnd::Lost { reason, streamed } => {
                    self.health.record_disconnect();
                    self.health.set_state(ConnectionState::Reconnecting).await;
                    if streamed {
                        failures = 0;
                    }
                    let delay = self.reconnect.delay_for(failures);
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        reason = %reason,
                        attempt = failures,
                        backoff_ms = delay.as_millis() as u64,
                        "Feed connection lost, reconnecting"
                    );
                    if !sleep_or_cancel(delay, &self.cancel).await {
                        break;
                    }
                }
            }
        }

        self.health.set_state(ConnectionState::Disconnected).await;
        tracing::info!("Connection supervisor stopped");
    }

    async fn run_session(&self) -> SessionEnd {
        self.health.set_state(ConnectionState::Connecting).await;
        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return SessionEnd::Stopped,
            result = self.connector.connect() => result,
        };
        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                return SessionEnd::Lost {
                    reason: format!("connect: {}", e),
                    streamed: false,
                }
            }
        };

        self.health.set_state(ConnectionState::Handshaking).await;
        let handshake = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = perform_handshake(
                &mut stream,
                &self.config.host,
                &self.config.path,
                self.config.handshake_timeout(),
            ) => Some(result),
        };
        let leftover = match handshake {
            None => {
                let _ = stream.close().await;
                return SessionEnd::Stopped;
            }
            Some(Ok(leftover)) => leftover,
            Some(Err(e)) => {
                let _ = stream.close().await;
                return SessionEnd::Lost {
                    reason: format!("handshake: {}", e),
                    streamed: false,
                };
            }
        };

        self.health.set_state(ConnectionState::Subscribing).await;
        let keys = self.registry.reset_for_reconnect().await;
        if let Err(e) = self.send_subscriptions(&mut stream, &keys).await {
            let _ = stream.close().await;
            return SessionEnd::Lost {
                reason: format!("subscribe: {}", e),
                streamed: false,
            };
        }

        self.health.set_state(ConnectionState::Streaming).await;
        self.health.record_session();
        tracing::info!(instruments = keys.len(), "Feed streaming");

        let end = self.read_loop(&mut stream, leftover).await;

        if end == SessionEnd::Stopped {
            let close = encode_close(CLOSE_NORMAL, "client shutdown");
            match tokio::time::timeout(CLOSE_GRACE, stream.write_all(&close)).await {
                Ok(Ok(())) => tracing::debug!("Close frame sent"),
                Ok(Err(e)) => tracing::debug!(error = %e, "Failed to send close frame"),
                Err(_) => tracing::debug!("Timed out sending close frame"),
            }
        }
        let _ = tokio::time::timeout(CLOSE_GRACE, stream.close()).await;
        end
    }

    /// Send the public request and, with credentials, the signed one; then
    /// mark the keys sent
    async fn send_subscriptions(&self, stream: &mut C::Stream, keys: &[PairKey]) -> ExchangeResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let product_ids = self.registry.product_ids(keys).await;

        if let Some(request) = build_public_subscribe_request(&product_ids) {
            let json = request.to_json().map_err(|e| {
                ExchangeError::InvalidResponse(format!("Failed to encode subscribe request: {}", e))
            })?;
            self.send(stream, &encode_text_frame(json.as_bytes())).await?;
        }

        let now = chrono::Utc::now().timestamp();
        match build_private_subscribe_request(&product_ids, self.credentials.as_ref(), now) {
            Ok(Some(request)) => {
                let json = request.to_json().map_err(|e| {
                    ExchangeError::InvalidResponse(format!("Failed to encode subscribe request: {}", e))
                })?;
                self.send(stream, &encode_text_frame(json.as_bytes())).await?;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Signed subscription unavailable, continuing with public data only");
            }
        }

        self.registry.mark_sent(keys).await;
        tracing::info!(products = ?product_ids, "Subscribe request sent");
        Ok(())
    }

    async fn send(&self, stream: &mut C::Stream, bytes: &[u8]) -> ExchangeResult<()> {
        let timeout = self.config.write_timeout();
        match tokio::time::timeout(timeout, stream.write_all(bytes)).await {
            Ok(result) => result.map_err(ExchangeError::from),
            Err(_) => Err(ExchangeError::NetworkTimeout(timeout.as_millis() as u64)),
        }
    }

    /// The read loop of one connection
    async fn read_loop(&self, stream: &mut C::Stream, leftover: Vec<u8>) -> SessionEnd {
        let max_payload = self.config.max_frame_payload_bytes;
        let mut state = StreamState {
            frames: FrameBuffer::new(max_payload),
            reassembly: ReassemblyEngine::new(max_payload as usize),
            keepalive: KeepAlive::new(
                self.config.ping_interval(),
                self.config.silence_timeout(),
                Instant::now(),
            ),
            transient_errors: 0,
        };
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];

        state.frames.extend(&leftover);
        if let Some(end) = self.drain_frames(stream, &mut state).await {
            return end;
        }

        loop {
            if self.cancel.is_cancelled() {
                return SessionEnd::Stopped;
            }

            // Instruments registered while streaming
            if !self.registry.take_new().await.is_empty() {
                let keys = self.registry.active_keys().await;
                if let Err(e) = self.send_subscriptions(stream, &keys).await {
                    return SessionEnd::lost(format!("subscribe: {}", e));
                }
            }

            let now = Instant::now();
            if let Some(staleness) = state.keepalive.staleness(now) {
                return SessionEnd::lost(format!("connection stale: {:?}", staleness));
            }
            if state.keepalive.should_ping(now) {
                if let Err(e) = self.send(stream, &encode_control_frame(Opcode::Ping, b"")).await {
                    return SessionEnd::lost(format!("ping send failed: {}", e));
                }
                state.keepalive.on_ping_sent(now);
                tracing::trace!(unanswered = state.keepalive.unanswered_pings(), "Ping sent");
            }

            let read = tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Stopped,
                read = tokio::time::timeout(self.config.read_timeout(), stream.read(&mut chunk)) => read,
            };

            match read {
                // Idle; loop around to service keepalive
                Err(_) => continue,
                Ok(Ok(0)) => return SessionEnd::lost("peer closed the connection"),
                Ok(Ok(n)) => {
                    state.transient_errors = 0;
                    state.keepalive.on_data(Instant::now());
                    state.frames.extend(&chunk[..n]);
                }
                Ok(Err(e)) if is_transient(&e) => {
                    state.transient_errors += 1;
                    if state.transient_errors > self.config.max_transient_read_retries {
                        return SessionEnd::lost(format!(
                            "{} consecutive transient read errors, last: {}",
                            state.transient_errors, e
                        ));
                    }
                    tracing::debug!(error = %e, attempt = state.transient_errors, "Transient read error, retrying");
                    if !sleep_or_cancel(self.config.transient_retry_sleep(), &self.cancel).await {
                        return SessionEnd::Stopped;
                    }
                    continue;
                }
                Ok(Err(e)) => return SessionEnd::lost(format!("read failed: {}", e)),
            }

            if let Some(end) = self.drain_frames(stream, &mut state).await {
                return end;
            }
        }
    }

    /// Handle every complete frame currently buffered. Returns `Some` when
    /// the session must end.
    async fn drain_frames(&self, stream: &mut C::Stream, state: &mut StreamState) -> Option<SessionEnd> {
        while let Some(event) = state.frames.next_event() {
            let frame = match event {
                FrameEvent::Frame(frame) => frame,
                FrameEvent::Resync(reason) => {
                    tracing::warn!(reason = %reason, "Malformed frame header, skipping one byte");
                    continue;
                }
                FrameEvent::Oversized { opcode, fin, len, max } => {
                    let err = ExchangeError::FrameTooLarge { len, max };
                    tracing::error!(opcode = %opcode, fin, error = %err, "Dropping oversized frame");
                    for message in state.reassembly.discard_frame(opcode, fin) {
                        self.router.route(&message).await;
                    }
                    continue;
                }
            };
            self.health.record_frame();

            match frame.opcode {
                Opcode::Ping => {
                    let pong = encode_control_frame(Opcode::Pong, &frame.payload);
                    if let Err(e) = self.send(stream, &pong).await {
                        return Some(SessionEnd::lost(format!("pong send failed: {}", e)));
                    }
                    tracing::trace!(len = frame.payload.len(), "Answered ping");
                }
                Opcode::Pong => {
                    state.keepalive.on_pong(Instant::now());
                }
                Opcode::Close => {
                    let (code, reason) = parse_close_payload(&frame.payload);
                    tracing::warn!(code = ?code, reason = %reason, "Server closed the connection");
                    return Some(SessionEnd::lost(format!(
                        "server close (code {:?}): {}",
                        code, reason
                    )));
                }
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    for message in state.reassembly.push(frame) {
                        self.router.route(&message).await;
                    }
                }
                Opcode::Reserved(value) => {
                    tracing::debug!(opcode = value, len = frame.payload.len(), "Reserved opcode, skipping frame");
                }
            }
        }
        None
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_error_kinds() {
        assert!(is_transient(&std::io::Error::from(ErrorKind::WouldBlock)));
        assert!(is_transient(&std::io::Error::from(ErrorKind::TimedOut)));
        assert!(is_transient(&std::io::Error::from(ErrorKind::Interrupted)));
        assert!(!is_transient(&std::io::Error::from(ErrorKind::ConnectionReset)));
        assert!(!is_transient(&std::io::Error::from(ErrorKind::BrokenPipe)));
    }

    #[test]
    fn test_session_end_lost_counts_as_streamed() {
        assert_eq!(
            SessionEnd::lost("x"),
            SessionEnd::Lost {
                reason: "x".into(),
                streamed: true
            }
        );
    }
}
