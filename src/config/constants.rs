//! Application-wide constants and configuration defaults
//!
//! Every tunable lives here. The YAML config takes precedence; when a field
//! is absent its default comes from these functions, which in turn honor an
//! environment variable override.

use std::time::Duration;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// =============================================================================
// Environment variable names
// =============================================================================

/// Path of the YAML configuration file
pub const CONFIG_PATH_ENV: &str = "BOOK_FEED_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

pub const API_KEY_ENV: &str = "BOOK_FEED_API_KEY";
pub const API_SECRET_ENV: &str = "BOOK_FEED_API_SECRET";
pub const API_PASSPHRASE_ENV: &str = "BOOK_FEED_API_PASSPHRASE";

// =============================================================================
// Feed endpoint
// =============================================================================

pub const DEFAULT_FEED_HOST: &str = "ws-feed.exchange.coinbase.com";
pub const DEFAULT_FEED_PORT: u16 = 443;
pub const DEFAULT_FEED_PATH: &str = "/";

/// Channels every instrument is subscribed to without credentials
pub const PUBLIC_CHANNELS: &[&str] = &["ticker", "heartbeat"];
/// Channels that require a signed subscription
pub const PRIVATE_CHANNELS: &[&str] = &["level2"];

/// Path signed for feed authentication
pub const AUTH_VERIFY_PATH: &str = "/users/self/verify";

// =============================================================================
// WebSocket Configuration
// =============================================================================

/// Keepalive ping interval (default: 30000ms)
///
/// Environment variable: `WS_PING_INTERVAL_MS`
pub fn ws_ping_interval_ms() -> u64 {
    env_or("WS_PING_INTERVAL_MS", 30_000)
}

/// Maximum inbound silence before the link is considered dead
/// (default: two ping intervals)
///
/// Environment variable: `WS_SILENCE_TIMEOUT_MS`
pub fn ws_silence_timeout_ms() -> u64 {
    env_or("WS_SILENCE_TIMEOUT_MS", ws_ping_interval_ms() * 2)
}

/// Bound on a single read so the loop can service pings (default: 250ms)
///
/// Environment variable: `WS_READ_TIMEOUT_MS`
pub fn ws_read_timeout_ms() -> u64 {
    env_or("WS_READ_TIMEOUT_MS", 250)
}

/// Consecutive transient read errors tolerated before reconnecting (default: 20)
///
/// Environment variable: `WS_MAX_TRANSIENT_READ_RETRIES`
pub fn ws_max_transient_read_retries() -> u32 {
    env_or("WS_MAX_TRANSIENT_READ_RETRIES", 20)
}

/// Sleep between transient read retries (default: 50ms)
///
/// Environment variable: `WS_TRANSIENT_RETRY_SLEEP_MS`
pub fn ws_transient_retry_sleep_ms() -> u64 {
    env_or("WS_TRANSIENT_RETRY_SLEEP_MS", 50)
}

/// Largest frame payload accepted (default: 768 KiB)
///
/// Environment variable: `WS_MAX_FRAME_PAYLOAD_BYTES`
pub fn ws_max_frame_payload_bytes() -> u64 {
    env_or("WS_MAX_FRAME_PAYLOAD_BYTES", 768 * 1024)
}

/// TCP + TLS connect timeout (default: 10000ms)
///
/// Environment variable: `WS_CONNECT_TIMEOUT_MS`
pub fn ws_connect_timeout_ms() -> u64 {
    env_or("WS_CONNECT_TIMEOUT_MS", 10_000)
}

/// Upgrade handshake timeout (default: 10000ms)
///
/// Environment variable: `WS_HANDSHAKE_TIMEOUT_MS`
pub fn ws_handshake_timeout_ms() -> u64 {
    env_or("WS_HANDSHAKE_TIMEOUT_MS", 10_000)
}

/// Timeout applied to each outbound frame write (default: 5000ms)
///
/// Environment variable: `WS_WRITE_TIMEOUT_MS`
pub fn ws_write_timeout_ms() -> u64 {
    env_or("WS_WRITE_TIMEOUT_MS", 5_000)
}

// =============================================================================
// Reconnect Configuration
// =============================================================================

/// Delay before the first reconnect attempt (default: 1000ms)
///
/// Environment variable: `RECONNECT_INITIAL_DELAY_MS`
pub fn reconnect_initial_delay_ms() -> u64 {
    env_or("RECONNECT_INITIAL_DELAY_MS", 1_000)
}

/// Backoff ceiling; equal to the initial delay means fixed backoff
///
/// Environment variable: `RECONNECT_MAX_DELAY_MS`
pub fn reconnect_max_delay_ms() -> u64 {
    env_or("RECONNECT_MAX_DELAY_MS", reconnect_initial_delay_ms())
}

/// Random jitter added to each reconnect delay (default: 0ms)
///
/// Environment variable: `RECONNECT_JITTER_MS`
pub fn reconnect_jitter_ms() -> u64 {
    env_or("RECONNECT_JITTER_MS", 0)
}

// =============================================================================
// Order Book Configuration
// =============================================================================

/// Minimum spacing between two applied delta batches (default: 50ms)
///
/// Environment variable: `BOOK_MIN_APPLY_INTERVAL_MS`
pub fn book_min_apply_interval_ms() -> u64 {
    env_or("BOOK_MIN_APPLY_INTERVAL_MS", 50)
}

/// Maximum deltas applied from one batch (default: 100)
///
/// Environment variable: `BOOK_MAX_BATCH_UPDATES`
pub fn book_max_batch_updates() -> usize {
    env_or("BOOK_MAX_BATCH_UPDATES", 100)
}

/// Levels per side shown in status output (default: 5)
///
/// Environment variable: `BOOK_DISPLAY_DEPTH`
pub fn book_display_depth() -> usize {
    env_or("BOOK_DISPLAY_DEPTH", 5)
}

/// Price tolerance under which two levels are the same level
pub const PRICE_EPSILON: f64 = 1e-6;

// =============================================================================
// REST Configuration
// =============================================================================

/// Base URL of the spot price endpoint
///
/// Environment variable: `REST_BASE_URL`
pub fn rest_base_url() -> String {
    std::env::var("REST_BASE_URL").unwrap_or_else(|_| "https://api.coinbase.com".to_string())
}

/// Attempts for the initial price seed (default: 3)
///
/// Environment variable: `REST_SEED_ATTEMPTS`
pub fn rest_seed_attempts() -> u32 {
    env_or("REST_SEED_ATTEMPTS", 3)
}

/// Per-request timeout (default: 5000ms)
///
/// Environment variable: `REST_TIMEOUT_MS`
pub fn rest_timeout_ms() -> u64 {
    env_or("REST_TIMEOUT_MS", 5_000)
}

// =============================================================================
// Display
// =============================================================================

/// Status print interval of the binary (default: 2000ms)
///
/// Environment variable: `DISPLAY_INTERVAL_MS`
pub fn display_interval_ms() -> u64 {
    env_or("DISPLAY_INTERVAL_MS", 2_000)
}

/// Grace period for the supervisor task to stop on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
