//! Per-instrument limit order book
//!
//! Bids are kept descending by price, asks ascending; the best level is
//! always at index 0. Two prices within [`PRICE_EPSILON`] are the same
//! level, and zero-size levels are never stored.
//!
//! [`OrderBookHandle`] wraps a book in a mutex shared by the supervisor's
//! read loop (the only writer) and any number of snapshot readers, and
//! throttles delta application to a minimum interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::constants::PRICE_EPSILON;
use crate::config::BookConfig;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    Bid,
    Ask,
}

/// One price level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

impl PriceLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

/// Upsert of a single level; `size == 0` removes it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelDelta {
    pub side: BookSide,
    pub price: f64,
    pub size: f64,
}

impl LevelDelta {
    pub fn bid(price: f64, size: f64) -> Self {
        Self { side: BookSide::Bid, price, size }
    }

    pub fn ask(price: f64, size: f64) -> Self {
        Self { side: BookSide::Ask, price, size }
    }
}

/// Top-of-book copy taken under the lock
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookSnapshot {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub limited_data: bool,
    pub last_update_time: Option<DateTime<Utc>>,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn spread(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }
}

// =============================================================================
// OrderBook
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: Vec<PriceLevel>,
    asks: Vec<PriceLevel>,
    limited_data: bool,
    last_update_time: Option<DateTime<Utc>>,
    last_applied: Option<Instant>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bids(&self) -> &[PriceLevel] {
        &self.bids
    }

    pub fn asks(&self) -> &[PriceLevel] {
        &self.asks
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// True when the book holds only a ticker-derived top of book
    pub fn limited_data(&self) -> bool {
        self.limited_data
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.last_update_time
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Time still to wait before the next batch may be applied
    pub fn throttle_wait(&self, now: Instant, min_interval: Duration) -> Duration {
        match self.last_applied {
            Some(last) => min_interval.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Apply up to `max_batch` deltas in order, then resort both sides.
    ///
    /// Returns the number of deltas applied. Deltas past the cap are dropped.
    pub fn apply_deltas(&mut self, deltas: &[LevelDelta], max_batch: usize) -> usize {
        let batch = if deltas.len() > max_batch {
            tracing::warn!(
                received = deltas.len(),
                applied = max_batch,
                "Level update batch exceeds cap, truncating"
            );
            &deltas[..max_batch]
        } else {
            deltas
        };

        if self.limited_data {
            // Ticker-derived levels are not part of the depth book
            self.bids.clear();
            self.asks.clear();
            self.limited_data = false;
        }

        for delta in batch {
            self.upsert(*delta);
        }
        self.resort();

        self.last_update_time = Some(Utc::now());
        self.last_applied = Some(Instant::now());
        batch.len()
    }

    /// Replace both sides with a full snapshot
    pub fn apply_snapshot(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.bids.clear();
        self.asks.clear();
        self.limited_data = false;
        for level in bids {
            self.upsert(LevelDelta::bid(level.price, level.size));
        }
        for level in asks {
            self.upsert(LevelDelta::ask(level.price, level.size));
        }
        self.resort();
        self.last_update_time = Some(Utc::now());
    }

    /// Synthesize a one-level book from ticker best bid/ask.
    ///
    /// Only touches a book that is empty or already ticker-derived; a
    /// depth book is left alone. Returns true when the book changed.
    pub fn apply_ticker_best_bid_ask(
        &mut self,
        bid: f64,
        bid_size: f64,
        ask: f64,
        ask_size: f64,
    ) -> bool {
        if !self.is_empty() && !self.limited_data {
            return false;
        }

        self.bids.clear();
        self.asks.clear();
        if is_valid_level(bid, bid_size) {
            self.bids.push(PriceLevel::new(bid, bid_size));
        }
        if is_valid_level(ask, ask_size) {
            self.asks.push(PriceLevel::new(ask, ask_size));
        }
        self.limited_data = true;
        self.last_update_time = Some(Utc::now());
        true
    }

    /// Copy of the top `depth` levels per side
    pub fn snapshot(&self, depth: usize) -> BookSnapshot {
        BookSnapshot {
            bids: self.bids.iter().take(depth).copied().collect(),
            asks: self.asks.iter().take(depth).copied().collect(),
            limited_data: self.limited_data,
            last_update_time: self.last_update_time,
        }
    }

    fn upsert(&mut self, delta: LevelDelta) {
        if !delta.price.is_finite() || !delta.size.is_finite() {
            tracing::warn!(price = delta.price, size = delta.size, "Non-finite level delta, skipping");
            return;
        }
        let side = match delta.side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        };
        let existing = side
            .iter()
            .position(|l| (l.price - delta.price).abs() < PRICE_EPSILON);

        match existing {
            Some(idx) if delta.size <= 0.0 => {
                side.remove(idx);
            }
            Some(idx) => side[idx].size = delta.size,
            None if delta.size > 0.0 => side.push(PriceLevel::new(delta.price, delta.size)),
            None => {}
        }
    }

    fn resort(&mut self) {
        self.bids.retain(|l| l.size > 0.0);
        self.asks.retain(|l| l.size > 0.0);
        self.bids.sort_by(|a, b| b.price.total_cmp(&a.price));
        self.asks.sort_by(|a, b| a.price.total_cmp(&b.price));
    }
}

fn is_valid_level(price: f64, size: f64) -> bool {
    price.is_finite() && size.is_finite() && price > 0.0 && size > 0.0
}

// =============================================================================
// Shared handle
// =============================================================================

/// Shared, throttled access to one instrument's book
#[derive(Debug, Clone)]
pub struct OrderBookHandle {
    inner: Arc<Mutex<OrderBook>>,
    min_apply_interval: Duration,
    max_batch: usize,
}

impl OrderBookHandle {
    pub fn new(config: &BookConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OrderBook::new())),
            min_apply_interval: config.min_apply_interval(),
            max_batch: config.max_batch_updates,
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, OrderBook> {
        self.inner.lock().await
    }

    /// Apply a batch, first waiting out the minimum interval since the
    /// previous batch. The wait happens without holding the lock.
    pub async fn apply_deltas(&self, deltas: &[LevelDelta]) -> usize {
        let wait = self
            .inner
            .lock()
            .await
            .throttle_wait(Instant::now(), self.min_apply_interval);
        if !wait.is_zero() {
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Throttling level update batch");
            tokio::time::sleep(wait).await;
        }
        self.inner.lock().await.apply_deltas(deltas, self.max_batch)
    }

    pub async fn apply_snapshot(&self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.inner.lock().await.apply_snapshot(bids, asks);
    }

    pub async fn apply_ticker_best_bid_ask(
        &self,
        bid: f64,
        bid_size: f64,
        ask: f64,
        ask_size: f64,
    ) -> bool {
        self.inner
            .lock()
            .await
            .apply_ticker_best_bid_ask(bid, bid_size, ask, ask_size)
    }

    pub async fn snapshot(&self, depth: usize) -> BookSnapshot {
        self.inner.lock().await.snapshot(depth)
    }
}
