//! Configuration types
//!
//! Every section derives `Default` from `constants`, so a YAML file only
//! needs to name what it changes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::shared::ReconnectConfig;
use crate::error::AppError;

use super::constants;

// ============================================================================
// Trading pair
// ============================================================================

/// Base/quote asset pair, written `BASE-QUOTE` (e.g. `BTC-USD`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TradingPair {
    pub base: String,
    pub quote: String,
}

impl TradingPair {
    /// Asset codes are upper-cased
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self {
            base: base.as_ref().trim().to_ascii_uppercase(),
            quote: quote.as_ref().trim().to_ascii_uppercase(),
        }
    }

    /// Instrument identifier used on the feed
    pub fn product_id(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        let (base, quote) = s
            .split_once('-')
            .ok_or_else(|| AppError::Config(format!("Invalid pair '{}': expected BASE-QUOTE", s)))?;
        let pair = Self::new(base, quote);
        pair.validate()?;
        Ok(pair)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let valid = |code: &str| !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(&self.base) || !valid(&self.quote) {
            return Err(AppError::Config(format!(
                "Invalid pair '{}-{}': asset codes must be non-empty alphanumerics",
                self.base, self.quote
            )));
        }
        Ok(())
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl TryFrom<String> for TradingPair {
    type Error = AppError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TradingPair> for String {
    fn from(pair: TradingPair) -> Self {
        pair.product_id()
    }
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Reconnect backoff settings for the feed connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: constants::reconnect_initial_delay_ms(),
            max_delay_ms: constants::reconnect_max_delay_ms(),
            jitter_ms: constants::reconnect_jitter_ms(),
        }
    }
}

impl ReconnectSettings {
    /// The supervisor retries forever; `max_attempts` is unused there
    pub fn to_reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: u32::MAX,
            initial_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_ms: self.jitter_ms,
        }
    }
}

/// WebSocket feed connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub ping_interval_ms: u64,
    /// Maximum inbound silence before reconnecting; 0 disables the check
    pub silence_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_transient_read_retries: u32,
    pub transient_retry_sleep_ms: u64,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub max_frame_payload_bytes: u64,
    pub reconnect: ReconnectSettings,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: constants::DEFAULT_FEED_HOST.to_string(),
            port: constants::DEFAULT_FEED_PORT,
            path: constants::DEFAULT_FEED_PATH.to_string(),
            ping_interval_ms: constants::ws_ping_interval_ms(),
            silence_timeout_ms: constants::ws_silence_timeout_ms(),
            read_timeout_ms: constants::ws_read_timeout_ms(),
            max_transient_read_retries: constants::ws_max_transient_read_retries(),
            transient_retry_sleep_ms: constants::ws_transient_retry_sleep_ms(),
            connect_timeout_ms: constants::ws_connect_timeout_ms(),
            handshake_timeout_ms: constants::ws_handshake_timeout_ms(),
            write_timeout_ms: constants::ws_write_timeout_ms(),
            max_frame_payload_bytes: constants::ws_max_frame_payload_bytes(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl FeedConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn transient_retry_sleep(&self) -> Duration {
        Duration::from_millis(self.transient_retry_sleep_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.host.trim().is_empty() {
            return Err(AppError::Config("feed.host cannot be empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(AppError::Config(format!(
                "feed.path must start with '/', got '{}'",
                self.path
            )));
        }
        if self.ping_interval_ms == 0 {
            return Err(AppError::Config("feed.ping_interval_ms must be > 0".to_string()));
        }
        if self.read_timeout_ms == 0 {
            return Err(AppError::Config("feed.read_timeout_ms must be > 0".to_string()));
        }
        if self.silence_timeout_ms != 0 && self.silence_timeout_ms < self.ping_interval_ms {
            return Err(AppError::Config(format!(
                "feed.silence_timeout_ms ({}) must be 0 or >= ping_interval_ms ({})",
                self.silence_timeout_ms, self.ping_interval_ms
            )));
        }
        if self.max_frame_payload_bytes < 125 {
            return Err(AppError::Config(format!(
                "feed.max_frame_payload_bytes must be >= 125, got {}",
                self.max_frame_payload_bytes
            )));
        }
        if self.reconnect.initial_delay_ms == 0 {
            return Err(AppError::Config(
                "feed.reconnect.initial_delay_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Order book maintenance settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookConfig {
    pub min_apply_interval_ms: u64,
    pub max_batch_updates: usize,
    pub display_depth: usize,
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            min_apply_interval_ms: constants::book_min_apply_interval_ms(),
            max_batch_updates: constants::book_max_batch_updates(),
            display_depth: constants::book_display_depth(),
        }
    }
}

impl BookConfig {
    pub fn min_apply_interval(&self) -> Duration {
        Duration::from_millis(self.min_apply_interval_ms)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.max_batch_updates == 0 {
            return Err(AppError::Config("book.max_batch_updates must be > 0".to_string()));
        }
        Ok(())
    }
}

/// REST price endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub base_url: String,
    pub seed_attempts: u32,
    pub timeout_ms: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: constants::rest_base_url(),
            seed_attempts: constants::rest_seed_attempts(),
            timeout_ms: constants::rest_timeout_ms(),
        }
    }
}

impl RestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Bounded retry policy for the price seed
    pub fn retry_config(&self, reconnect: &ReconnectSettings) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts: self.seed_attempts,
            ..reconnect.to_reconnect_config()
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(AppError::Config(format!(
                "rest.base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.seed_attempts == 0 {
            return Err(AppError::Config("rest.seed_attempts must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Root application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub book: BookConfig,
    pub rest: RestConfig,
    /// Instruments tracked at startup
    pub pairs: Vec<TradingPair>,
    /// Status print interval of the binary
    pub display_interval_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            book: BookConfig::default(),
            rest: RestConfig::default(),
            pairs: vec![TradingPair::new("BTC", "USD")],
            display_interval_ms: constants::display_interval_ms(),
        }
    }
}

impl AppConfig {
    /// Validate all configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        if self.pairs.is_empty() {
            return Err(AppError::Config(
                "Configuration must contain at least one pair".to_string(),
            ));
        }
        for (i, pair) in self.pairs.iter().enumerate() {
            pair.validate()?;
            if self.pairs[..i].contains(pair) {
                return Err(AppError::Config(format!("Duplicate pair '{}'", pair)));
            }
        }
        self.feed.validate()?;
        self.book.validate()?;
        self.rest.validate()?;
        if self.display_interval_ms == 0 {
            return Err(AppError::Config("display_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn display_interval(&self) -> Duration {
        Duration::from_millis(self.display_interval_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================
