//! Coinbase feed message types
//!
//! Inbound messages are JSON objects tagged by `type`. Prices and sizes
//! arrive as decimal strings (numbers are accepted too). A level change is
//! either the compact `["buy", "price", "size"]` triple or an object with
//! `side`/`price`/`size` fields. A bare change, or a bare array of them, is
//! also accepted on its own as an untagged level update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::order_book::{BookSide, LevelDelta, PriceLevel};

// =============================================================================
// Numeric helpers
// =============================================================================

/// A decimal that may be encoded as a JSON string or a JSON number
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Decimal {
    Text(String),
    Number(f64),
}

impl Decimal {
    fn to_f64(&self) -> Result<f64, String> {
        let value = match self {
            Decimal::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|e| format!("invalid decimal {:?}: {}", s, e))?,
            Decimal::Number(n) => *n,
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(format!("non-finite decimal {}", value))
        }
    }
}

fn de_decimal<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Decimal::deserialize(deserializer)?
        .to_f64()
        .map_err(serde::de::Error::custom)
}

fn de_opt_decimal<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Decimal>::deserialize(deserializer)? {
        Some(d) => d.to_f64().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}

// =============================================================================
// Level changes
// =============================================================================

/// Order side as named on the wire (`buy` = bids, `sell` = asks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "bid")]
    Buy,
    #[serde(alias = "ask")]
    Sell,
}

impl From<Side> for BookSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => BookSide::Bid,
            Side::Sell => BookSide::Ask,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawChange {
    Triple(Side, Decimal, Decimal),
    Object {
        side: Side,
        price: Decimal,
        size: Decimal,
    },
}

/// One price-level change from an `l2update` / `level2_batch` message
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawChange")]
pub struct LevelChange {
    pub side: Side,
    pub price: f64,
    pub size: f64,
}

impl TryFrom<RawChange> for LevelChange {
    type Error = String;

    fn try_from(raw: RawChange) -> Result<Self, Self::Error> {
        let (side, price, size) = match raw {
            RawChange::Triple(side, price, size) => (side, price, size),
            RawChange::Object { side, price, size } => (side, price, size),
        };
        Ok(LevelChange {
            side,
            price: price.to_f64()?,
            size: size.to_f64()?,
        })
    }
}

impl From<LevelChange> for LevelDelta {
    fn from(change: LevelChange) -> Self {
        LevelDelta {
            side: change.side.into(),
            price: change.price,
            size: change.size,
        }
    }
}

/// `[price, size]` pair from a `snapshot` message
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "(Decimal, Decimal)")]
pub struct WireLevel {
    pub price: f64,
    pub size: f64,
}

impl TryFrom<(Decimal, Decimal)> for WireLevel {
    type Error = String;

    fn try_from((price, size): (Decimal, Decimal)) -> Result<Self, Self::Error> {
        Ok(WireLevel {
            price: price.to_f64()?,
            size: size.to_f64()?,
        })
    }
}

impl From<WireLevel> for PriceLevel {
    fn from(level: WireLevel) -> Self {
        PriceLevel::new(level.price, level.size)
    }
}

// =============================================================================
// Inbound messages
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TickerMessage {
    pub product_id: String,
    #[serde(deserialize_with = "de_decimal")]
    pub price: f64,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub best_bid: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub best_bid_size: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub best_ask: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub best_ask_size: Option<f64>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotMessage {
    pub product_id: String,
    #[serde(default)]
    pub bids: Vec<WireLevel>,
    #[serde(default)]
    pub asks: Vec<WireLevel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LevelUpdateMessage {
    pub product_id: String,
    pub changes: Vec<LevelChange>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sequence: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatMessage {
    pub product_id: String,
    #[serde(default)]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelAck {
    pub name: String,
    #[serde(default)]
    pub product_ids: Vec<String>,
}

/// Server acknowledgement listing the channels currently subscribed
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionsMessage {
    #[serde(default)]
    pub channels: Vec<ChannelAck>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum FeedMessage {
    #[serde(rename = "ticker")]
    Ticker(TickerMessage),
    #[serde(rename = "snapshot")]
    Snapshot(SnapshotMessage),
    #[serde(rename = "l2update")]
    L2Update(LevelUpdateMessage),
    #[serde(rename = "level2_batch")]
    Level2Batch(LevelUpdateMessage),
    #[serde(rename = "heartbeat")]
    Heartbeat(HeartbeatMessage),
    #[serde(rename = "subscriptions")]
    Subscriptions(SubscriptionsMessage),
    #[serde(rename = "error")]
    Error(ErrorMessage),
    /// Any other `type`; ignored by the router
    #[serde(other)]
    Other,
}

impl FeedMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Product the message is about, for per-instrument messages
    pub fn product_id(&self) -> Option<&str> {
        match self {
            FeedMessage::Ticker(m) => Some(&m.product_id),
            FeedMessage::Snapshot(m) => Some(&m.product_id),
            FeedMessage::L2Update(m) | FeedMessage::Level2Batch(m) => Some(&m.product_id),
            FeedMessage::Heartbeat(m) => Some(&m.product_id),
            _ => None,
        }
    }
}

/// Any inbound text message: a tagged feed message, or a level update sent
/// without an envelope
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Tagged(FeedMessage),
    BareChanges(Vec<LevelChange>),
    BareChange(LevelChange),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BareLevels {
    Many(Vec<LevelChange>),
    One(LevelChange),
}

impl InboundMessage {
    /// JSON arrays are bare level updates; everything else must be tagged
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim_start().starts_with('[') {
            return Ok(match serde_json::from_str::<BareLevels>(text)? {
                BareLevels::Many(changes) => InboundMessage::BareChanges(changes),
                BareLevels::One(change) => InboundMessage::BareChange(change),
            });
        }
        FeedMessage::decode(text).map(InboundMessage::Tagged)
    }
}

// =============================================================================
// Outbound messages
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSpec {
    pub name: String,
    pub product_ids: Vec<String>,
}

/// `{type: "subscribe", ...}` request, optionally carrying auth fields
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub product_ids: Vec<String>,
    pub channels: Vec<ChannelSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl SubscribeRequest {
    pub fn new(product_ids: Vec<String>, channel_names: &[&str]) -> Self {
        let channels = channel_names
            .iter()
            .map(|name| ChannelSpec {
                name: (*name).to_string(),
                product_ids: product_ids.clone(),
            })
            .collect();
        Self {
            kind: "subscribe",
            product_ids,
            channels,
            signature: None,
            key: None,
            passphrase: None,
            timestamp: None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
