//! Shared backoff logic
//!
//! `ReconnectConfig::delay_for` drives the supervisor's unbounded reconnect
//! loop; `retry_with_backoff` wraps one-shot requests (e.g. the REST price
//! seed) that should give up after a few attempts.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::adapters::errors::{ExchangeError, ExchangeResult};

/// Configuration for reconnection / retry attempts
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of attempts for bounded retries
    pub max_attempts: u32,
    /// Initial delay in milliseconds (doubles each attempt)
    pub initial_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    pub max_delay_ms: u64,
    /// Upper bound (exclusive) of the random jitter added to each delay
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    /// Fixed 1000ms backoff without jitter
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            jitter_ms: 0,
        }
    }
}

impl ReconnectConfig {
    /// Exponential delay `initial * 2^attempt`, capped at `max_delay_ms`, plus jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay_ms
            .saturating_mul(1u64 << attempt.min(20))
            .min(self.max_delay_ms.max(self.initial_delay_ms));
        let jitter = if self.jitter_ms > 0 {
            rand::random::<u64>() % self.jitter_ms
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

/// Sleep for `delay` unless `cancel` fires first; returns false when cancelled
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Retry an async operation with exponential backoff and jitter
///
/// The first attempt runs immediately; each retry waits `delay_for(n)`.
///
/// # Returns
/// * `Ok(T)` - An attempt succeeded
/// * `Err(ExchangeError)` - All attempts failed; carries the last error
pub async fn retry_with_backoff<T, F, Fut>(
    config: &ReconnectConfig,
    label: &str,
    mut op: F,
) -> ExchangeResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ExchangeResult<T>>,
{
    let mut last_error: Option<ExchangeError> = None;

    for attempt in 0..config.max_attempts {
        if attempt > 0 {
            let delay = config.delay_for(attempt - 1);
            tracing::info!(
                label = %label,
                attempt = attempt + 1,
                max_attempts = config.max_attempts,
                backoff_ms = delay.as_millis() as u64,
                "Retrying after backoff"
            );
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(label = %label, attempt = attempt + 1, error = %e, "Attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        ExchangeError::ConnectionFailed(format!("{}: no attempts were made", label))
    }))
}
