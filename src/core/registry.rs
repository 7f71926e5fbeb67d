//! Instrument registry and subscription state
//!
//! Maps trading pairs and feed product ids to stable [`PairKey`]s, owns each
//! instrument's [`InstrumentStatus`], and tracks where its subscription
//! stands on the current connection:
//!
//! ```text
//! NotSubscribed --take_new--> Pending --mark_sent--> Subscribed --confirm--> Confirmed
//!                                ^                                               |
//!                                +-------------- reset_for_reconnect ------------+
//! ```
//!
//! All maps live under one mutex, held only for lookups and transitions.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::config::{BookConfig, TradingPair};

use super::status::InstrumentStatus;

// =============================================================================
// Keys
// =============================================================================

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable identifier of a registered instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PairKey(u64);

impl PairKey {
    /// FNV-1a of `BASE-QUOTE`; the registry probes forward on collision
    pub fn for_pair(pair: &TradingPair) -> Self {
        let hash = pair
            .product_id()
            .bytes()
            .fold(FNV_OFFSET_BASIS, |acc, b| (acc ^ b as u64).wrapping_mul(FNV_PRIME));
        Self(hash)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriptionState {
    /// Registered, no subscribe request sent on this connection
    NotSubscribed,
    /// Queued for the next subscribe request
    Pending,
    /// Request sent, no data seen yet
    Subscribed,
    /// Data or a server ack has arrived for this instrument
    Confirmed,
}

impl SubscriptionState {
    pub fn is_active(self) -> bool {
        !matches!(self, SubscriptionState::NotSubscribed)
    }
}

// =============================================================================
// Registry
// =============================================================================

struct Entry {
    state: SubscriptionState,
    status: Arc<InstrumentStatus>,
}

#[derive(Default)]
struct Inner {
    by_pair: HashMap<TradingPair, PairKey>,
    by_product: HashMap<String, PairKey>,
    entries: BTreeMap<PairKey, Entry>,
}

pub struct InstrumentRegistry {
    inner: Mutex<Inner>,
    book_config: BookConfig,
}

impl InstrumentRegistry {
    pub fn new(book_config: BookConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            book_config,
        }
    }

    /// Register `pair`, idempotently.
    ///
    /// Returns the key and whether the pair was newly added.
    pub async fn register(&self, pair: TradingPair) -> (PairKey, bool) {
        let mut inner = self.inner.lock().await;
        if let Some(key) = inner.by_pair.get(&pair) {
            return (*key, false);
        }

        let mut key = PairKey::for_pair(&pair);
        while inner.entries.contains_key(&key) {
            tracing::debug!(pair = %pair, key = %key, "Pair key collision, trying next key");
            key = key.next();
        }

        let status = Arc::new(InstrumentStatus::new(pair.clone(), key, &self.book_config));
        inner.by_product.insert(pair.product_id(), key);
        inner.by_pair.insert(pair.clone(), key);
        inner.entries.insert(
            key,
            Entry {
                state: SubscriptionState::NotSubscribed,
                status,
            },
        );
        tracing::info!(pair = %pair, key = %key, "Instrument registered");
        (key, true)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    pub async fn key_for(&self, pair: &TradingPair) -> Option<PairKey> {
        self.inner.lock().await.by_pair.get(pair).copied()
    }

    /// Resolve a feed product id (`BTC-USD`) to its key
    pub async fn key_for_product(&self, product_id: &str) -> Option<PairKey> {
        self.inner.lock().await.by_product.get(product_id).copied()
    }

    pub async fn status(&self, key: PairKey) -> ExchangeResult<Arc<InstrumentStatus>> {
        self.inner
            .lock()
            .await
            .entries
            .get(&key)
            .map(|e| e.status.clone())
            .ok_or_else(|| ExchangeError::NotFound(key.to_string()))
    }

    pub async fn state(&self, key: PairKey) -> ExchangeResult<SubscriptionState> {
        self.inner
            .lock()
            .await
            .entries
            .get(&key)
            .map(|e| e.state)
            .ok_or_else(|| ExchangeError::NotFound(key.to_string()))
    }

    /// The key of the only registered instrument; `None` when zero or several
    /// are registered
    pub async fn sole_key(&self) -> Option<PairKey> {
        let inner = self.inner.lock().await;
        if inner.entries.len() != 1 {
            return None;
        }
        inner.entries.keys().next().copied()
    }

    /// All statuses in key order
    pub async fn statuses(&self) -> Vec<Arc<InstrumentStatus>> {
        self.inner
            .lock()
            .await
            .entries
            .values()
            .map(|e| e.status.clone())
            .collect()
    }

    /// Move every `NotSubscribed` entry to `Pending`; returns the moved keys
    pub async fn take_new(&self) -> Vec<PairKey> {
        let mut inner = self.inner.lock().await;
        inner
            .entries
            .iter_mut()
            .filter(|(_, e)| e.state == SubscriptionState::NotSubscribed)
            .map(|(key, e)| {
                e.state = SubscriptionState::Pending;
                *key
            })
            .collect()
    }

    /// Keys that are pending, subscribed or confirmed
    pub async fn active_keys(&self) -> Vec<PairKey> {
        self.inner
            .lock()
            .await
            .entries
            .iter()
            .filter(|(_, e)| e.state.is_active())
            .map(|(key, _)| *key)
            .collect()
    }

    /// Product ids for `keys`, skipping unknown keys
    pub async fn product_ids(&self, keys: &[PairKey]) -> Vec<String> {
        let inner = self.inner.lock().await;
        keys.iter()
            .filter_map(|key| inner.entries.get(key))
            .map(|e| e.status.pair().product_id())
            .collect()
    }

    /// `Pending -> Subscribed` for each of `keys`
    pub async fn mark_sent(&self, keys: &[PairKey]) {
        let mut inner = self.inner.lock().await;
        for key in keys {
            if let Some(entry) = inner.entries.get_mut(key) {
                if entry.state == SubscriptionState::Pending {
                    entry.state = SubscriptionState::Subscribed;
                }
            }
        }
    }

    /// Mark `key` confirmed; returns true on the first confirmation
    pub async fn confirm(&self, key: PairKey) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.entries.get_mut(&key) {
            Some(entry)
                if matches!(
                    entry.state,
                    SubscriptionState::Pending | SubscriptionState::Subscribed
                ) =>
            {
                entry.state = SubscriptionState::Confirmed;
                tracing::info!(pair = %entry.status.pair(), "Subscription confirmed");
                true
            }
            _ => false,
        }
    }

    /// A new connection knows nothing: every instrument goes back to
    /// `Pending` and its sequence tracking restarts. Returns all keys.
    pub async fn reset_for_reconnect(&self) -> Vec<PairKey> {
        let statuses = {
            let mut inner = self.inner.lock().await;
            inner
                .entries
                .values_mut()
                .map(|e| {
                    e.state = SubscriptionState::Pending;
                    e.status.clone()
                })
                .collect::<Vec<_>>()
        };
        for status in &statuses {
            status.reset_sequence().await;
        }
        statuses.iter().map(|s| s.key()).collect()
    }
}
