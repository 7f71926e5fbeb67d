//! Message routing
//!
//! Decodes each reassembled message and applies it to the instrument named
//! by its `product_id`. A bare level update carries no product id and is
//! applied only when exactly one instrument is registered. Nothing here can
//! fail the connection: undecodable or unroutable messages are logged and
//! dropped.

use std::sync::Arc;

use crate::adapters::coinbase::messages::{FeedMessage, InboundMessage, LevelChange, LevelUpdateMessage};
use crate::core::order_book::{LevelDelta, PriceLevel};
use crate::ws::{CompleteMessage, Opcode};

use super::registry::{InstrumentRegistry, PairKey};
use super::status::SequenceCheck;

/// What the router did with one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Instrument state was updated
    Applied(PairKey),
    /// Handled without touching instrument state (acks, heartbeats, errors)
    Handled,
    /// Not routed; carries the reason
    Dropped(String),
}

#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<InstrumentRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<InstrumentRegistry>) -> Self {
        Self { registry }
    }

    pub async fn route(&self, message: &CompleteMessage) -> RouteOutcome {
        let Some(text) = message.as_text() else {
            tracing::warn!(
                opcode = %message.opcode,
                len = message.payload.len(),
                "Message payload is not UTF-8, dropping"
            );
            return RouteOutcome::Dropped("payload is not UTF-8".into());
        };
        if message.opcode == Opcode::Binary {
            tracing::debug!(len = text.len(), "Binary message carries UTF-8, decoding as JSON");
        }
        self.route_text(text).await
    }

    pub async fn route_text(&self, text: &str) -> RouteOutcome {
        let decoded = match InboundMessage::decode(text) {
            Ok(InboundMessage::Tagged(msg)) => msg,
            Ok(InboundMessage::BareChanges(changes)) => return self.route_bare_changes(changes).await,
            Ok(InboundMessage::BareChange(change)) => return self.route_bare_changes(vec![change]).await,
            Err(e) => {
                tracing::warn!(error = %e, len = text.len(), "Failed to decode feed message");
                return RouteOutcome::Dropped(format!("decode error: {}", e));
            }
        };

        match decoded {
            FeedMessage::Ticker(ticker) => {
                let Some(key) = self.resolve(&ticker.product_id).await else {
                    return unroutable(&ticker.product_id);
                };
                let Ok(status) = self.registry.status(key).await else {
                    return unroutable(&ticker.product_id);
                };
                self.registry.confirm(key).await;

                if let SequenceCheck::Stale { last, received } =
                    status.check_sequence(ticker.sequence).await
                {
                    tracing::debug!(
                        product_id = %ticker.product_id,
                        last,
                        received,
                        "Out-of-date ticker, dropping"
                    );
                    return RouteOutcome::Dropped("stale sequence".into());
                }

                status.apply_ticker(&ticker).await;
                tracing::trace!(product_id = %ticker.product_id, price = ticker.price, "Ticker applied");
                RouteOutcome::Applied(key)
            }
            FeedMessage::Snapshot(snapshot) => {
                let Some(key) = self.resolve(&snapshot.product_id).await else {
                    return unroutable(&snapshot.product_id);
                };
                let Ok(status) = self.registry.status(key).await else {
                    return unroutable(&snapshot.product_id);
                };
                self.registry.confirm(key).await;

                let bids: Vec<PriceLevel> = snapshot.bids.into_iter().map(Into::into).collect();
                let asks: Vec<PriceLevel> = snapshot.asks.into_iter().map(Into::into).collect();
                status.book().apply_snapshot(&bids, &asks).await;
                tracing::info!(
                    product_id = %snapshot.product_id,
                    bids = bids.len(),
                    asks = asks.len(),
                    "Order book snapshot applied"
                );
                RouteOutcome::Applied(key)
            }
            FeedMessage::L2Update(update) | FeedMessage::Level2Batch(update) => {
                self.route_level_update(update).await
            }
            FeedMessage::Heartbeat(heartbeat) => {
                if let Some(key) = self.resolve(&heartbeat.product_id).await {
                    self.registry.confirm(key).await;
                }
                tracing::trace!(product_id = %heartbeat.product_id, sequence = ?heartbeat.sequence, "Heartbeat");
                RouteOutcome::Handled
            }
            FeedMessage::Subscriptions(ack) => {
                for channel in &ack.channels {
                    for product_id in &channel.product_ids {
                        if let Some(key) = self.resolve(product_id).await {
                            self.registry.confirm(key).await;
                        }
                    }
                }
                tracing::info!(
                    channels = ?ack.channels.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                    "Subscriptions acknowledged"
                );
                RouteOutcome::Handled
            }
            FeedMessage::Error(err) => {
                tracing::warn!(
                    message = %err.message,
                    reason = err.reason.as_deref().unwrap_or(""),
                    "Feed reported an error"
                );
                RouteOutcome::Handled
            }
            FeedMessage::Other => {
                tracing::trace!("Unhandled message type, ignoring");
                RouteOutcome::Dropped("unhandled message type".into())
            }
        }
    }

    async fn route_level_update(&self, update: LevelUpdateMessage) -> RouteOutcome {
        let Some(key) = self.resolve(&update.product_id).await else {
            return unroutable(&update.product_id);
        };
        let Ok(status) = self.registry.status(key).await else {
            return unroutable(&update.product_id);
        };
        self.registry.confirm(key).await;

        if let SequenceCheck::Stale { last, received } = status.check_sequence(update.sequence).await {
            tracing::debug!(product_id = %update.product_id, last, received, "Out-of-date level update, dropping");
            return RouteOutcome::Dropped("stale sequence".into());
        }

        let deltas: Vec<LevelDelta> = update.changes.into_iter().map(Into::into).collect();
        let applied = status.book().apply_deltas(&deltas).await;
        tracing::trace!(product_id = %update.product_id, applied, "Level update applied");
        RouteOutcome::Applied(key)
    }

    /// Level changes without an envelope belong to the sole instrument
    async fn route_bare_changes(&self, changes: Vec<LevelChange>) -> RouteOutcome {
        if changes.is_empty() {
            return RouteOutcome::Dropped("empty level update".into());
        }
        let Some(key) = self.registry.sole_key().await else {
            let registered = self.registry.len().await;
            tracing::warn!(
                changes = changes.len(),
                registered,
                "Bare level update cannot be attributed to one instrument, dropping"
            );
            return RouteOutcome::Dropped(format!(
                "bare level update with {} instruments registered",
                registered
            ));
        };
        let Ok(status) = self.registry.status(key).await else {
            return RouteOutcome::Dropped(format!("unregistered instrument {}", key));
        };
        self.registry.confirm(key).await;

        let deltas: Vec<LevelDelta> = changes.into_iter().map(Into::into).collect();
        let applied = status.book().apply_deltas(&deltas).await;
        tracing::debug!(pair = %status.pair(), applied, "Bare level update applied");
        RouteOutcome::Applied(key)
    }

    async fn resolve(&self, product_id: &str) -> Option<PairKey> {
        self.registry.key_for_product(product_id).await
    }
}

fn unroutable(product_id: &str) -> RouteOutcome {
    tracing::debug!(product_id = %product_id, "Message for unregistered instrument, dropping");
    RouteOutcome::Dropped(format!("unregistered instrument {}", product_id))
}
