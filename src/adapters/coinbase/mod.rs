//! Coinbase Exchange market data feed
//!
//! Wire messages, subscription building, feed authentication and the REST
//! price seed. The transport and frame handling live in `crate::ws`.

pub mod messages;
pub mod rest;
pub mod signing;
pub mod subscription;

pub use messages::{FeedMessage, InboundMessage, LevelChange, Side, SubscribeRequest};
pub use rest::{PriceSource, RestPriceSource};
pub use signing::{sign_subscription, Credentials};
pub use subscription::{build_private_subscribe_request, build_public_subscribe_request};
