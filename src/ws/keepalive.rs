//! Ping scheduling and staleness detection
//!
//! Owned by the supervisor for the lifetime of one connection; the last
//! ping/pong/data timestamps live here instead of in process-wide state.

use std::time::{Duration, Instant};

/// Number of consecutive unanswered pings after which the link is stale
pub const MAX_UNANSWERED_PINGS: u32 = 2;

/// True once `interval` has elapsed since the last ping (or none was sent yet)
pub fn should_ping(now: Instant, last_ping_time: Option<Instant>, interval: Duration) -> bool {
    match last_ping_time {
        Some(last) => now.saturating_duration_since(last) >= interval,
        None => true,
    }
}

/// Why the keepalive considers the connection dead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    UnansweredPings(u32),
    Silent(Duration),
}

#[derive(Debug)]
pub struct KeepAlive {
    interval: Duration,
    silence_timeout: Duration,
    last_ping: Option<Instant>,
    last_data: Instant,
    unanswered: u32,
}

impl KeepAlive {
    /// `silence_timeout` bounds how long the connection may go without any
    /// inbound byte; zero disables that check.
    pub fn new(interval: Duration, silence_timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            silence_timeout,
            last_ping: Some(now),
            last_data: now,
            unanswered: 0,
        }
    }

    pub fn should_ping(&self, now: Instant) -> bool {
        should_ping(now, self.last_ping, self.interval)
    }

    pub fn on_ping_sent(&mut self, now: Instant) {
        self.last_ping = Some(now);
        self.unanswered += 1;
    }

    pub fn on_pong(&mut self, now: Instant) {
        self.unanswered = 0;
        self.last_data = now;
    }

    /// Any inbound bytes prove the peer is alive
    pub fn on_data(&mut self, now: Instant) {
        self.last_data = now;
    }

    pub fn unanswered_pings(&self) -> u32 {
        self.unanswered
    }

    /// Checked before a new ping goes out: a ping still unanswered one full
    /// interval after the previous one counts toward staleness.
    pub fn staleness(&self, now: Instant) -> Option<Staleness> {
        if self.unanswered >= MAX_UNANSWERED_PINGS && self.should_ping(now) {
            return Some(Staleness::UnansweredPings(self.unanswered));
        }
        let silent_for = now.saturating_duration_since(self.last_data);
        if !self.silence_timeout.is_zero() && silent_for >= self.silence_timeout {
            return Some(Staleness::Silent(silent_for));
        }
        None
    }
}
