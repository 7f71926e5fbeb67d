//! Per-instrument status record
//!
//! Holds the ticker-derived quote and owns the instrument's order book.
//! The quote and the book sit behind separate locks; readers copy both out
//! and format after the locks are released.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::adapters::coinbase::messages::TickerMessage;
use crate::config::{BookConfig, TradingPair};

use super::order_book::{BookSnapshot, OrderBookHandle};
use super::registry::PairKey;

/// Ticker-derived fields plus sequence bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Quote {
    pub last_price: Option<f64>,
    pub best_bid: Option<f64>,
    pub best_bid_size: Option<f64>,
    pub best_ask: Option<f64>,
    pub best_ask_size: Option<f64>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub last_sequence: Option<u64>,
    /// Messages that arrived with a sequence at or below the last one seen
    pub stale_messages: u64,
    pub tickers: u64,
}

/// Outcome of checking a message's sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// No sequence on the message, or nothing seen yet
    Untracked,
    InOrder,
    /// Sequence at or below the last one; message is out of date
    Stale { last: u64, received: u64 },
}

#[derive(Debug)]
pub struct InstrumentStatus {
    pair: TradingPair,
    key: PairKey,
    quote: Mutex<Quote>,
    book: OrderBookHandle,
}

impl InstrumentStatus {
    pub fn new(pair: TradingPair, key: PairKey, book_config: &BookConfig) -> Self {
        Self {
            pair,
            key,
            quote: Mutex::new(Quote::default()),
            book: OrderBookHandle::new(book_config),
        }
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    pub fn key(&self) -> PairKey {
        self.key
    }

    pub fn book(&self) -> &OrderBookHandle {
        &self.book
    }

    /// Seed the last price (REST), without touching the timestamps
    pub async fn seed_price(&self, price: f64) {
        let mut quote = self.quote.lock().await;
        if quote.last_price.is_none() {
            quote.last_price = Some(price);
        }
    }

    /// Record `sequence` if it moves forward
    pub async fn check_sequence(&self, sequence: Option<u64>) -> SequenceCheck {
        let Some(received) = sequence else {
            return SequenceCheck::Untracked;
        };
        let mut quote = self.quote.lock().await;
        match quote.last_sequence {
            Some(last) if received <= last => {
                quote.stale_messages += 1;
                SequenceCheck::Stale { last, received }
            }
            Some(_) => {
                quote.last_sequence = Some(received);
                SequenceCheck::InOrder
            }
            None => {
                quote.last_sequence = Some(received);
                SequenceCheck::Untracked
            }
        }
    }

    /// Forget the last sequence; a new connection starts a fresh stream
    pub async fn reset_sequence(&self) {
        self.quote.lock().await.last_sequence = None;
    }

    /// Update the quote from a ticker and, when the book has no depth,
    /// synthesize its top level
    pub async fn apply_ticker(&self, ticker: &TickerMessage) {
        {
            let mut quote = self.quote.lock().await;
            quote.last_price = Some(ticker.price);
            quote.best_bid = ticker.best_bid.or(quote.best_bid);
            quote.best_bid_size = ticker.best_bid_size.or(quote.best_bid_size);
            quote.best_ask = ticker.best_ask.or(quote.best_ask);
            quote.best_ask_size = ticker.best_ask_size.or(quote.best_ask_size);
            quote.last_update_time = Some(ticker.time.unwrap_or_else(Utc::now));
            quote.tickers += 1;
        }

        if let (Some(bid), Some(bid_size), Some(ask), Some(ask_size)) = (
            ticker.best_bid,
            ticker.best_bid_size,
            ticker.best_ask,
            ticker.best_ask_size,
        ) {
            self.book
                .apply_ticker_best_bid_ask(bid, bid_size, ask, ask_size)
                .await;
        }
    }

    pub async fn quote(&self) -> Quote {
        self.quote.lock().await.clone()
    }

    pub async fn snapshot(&self, depth: usize) -> StatusSnapshot {
        let quote = self.quote().await;
        let book = self.book.snapshot(depth).await;
        StatusSnapshot {
            pair: self.pair.clone(),
            key: self.key,
            quote,
            book,
        }
    }
}

/// Point-in-time copy of one instrument's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub pair: TradingPair,
    pub key: PairKey,
    pub quote: Quote,
    pub book: BookSnapshot,
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bid = self.book.best_bid();
        let ask = self.book.best_ask();
        write!(
            f,
            "{} last={} bid={}x{} ask={}x{} depth={}/{}{}",
            self.pair,
            fmt_opt(self.quote.last_price),
            fmt_opt(bid.map(|l| l.price)),
            bid.map(|l| format!("{:.4}", l.size)).unwrap_or_else(|| "-".into()),
            fmt_opt(ask.map(|l| l.price)),
            ask.map(|l| format!("{:.4}", l.size)).unwrap_or_else(|| "-".into()),
            self.book.bids.len(),
            self.book.asks.len(),
            if self.book.limited_data { " (ticker only)" } else { "" },
        )
    }
}
