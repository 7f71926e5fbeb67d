//! Core feed logic
//!
//! - `order_book`: per-instrument book and its throttled shared handle
//! - `status`: ticker quote + book per instrument
//! - `registry`: pair keys and subscription state
//! - `router`: decoded message dispatch
//! - `health`: connection state shared with observers
//! - `supervisor`: connection lifecycle and read loop
//! - `client`: public facade

pub mod client;
pub mod health;
pub mod order_book;
pub mod registry;
pub mod router;
pub mod status;
pub mod supervisor;

pub use client::FeedClient;
pub use health::{ConnectionHealth, ConnectionState};
pub use order_book::{BookSide, BookSnapshot, LevelDelta, OrderBook, OrderBookHandle, PriceLevel};
pub use registry::{InstrumentRegistry, PairKey, SubscriptionState};
pub use router::{MessageRouter, RouteOutcome};
pub use status::{InstrumentStatus, Quote, SequenceCheck, StatusSnapshot};
pub use supervisor::ConnectionSupervisor;
