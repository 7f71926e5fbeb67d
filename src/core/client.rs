//! Feed client facade
//!
//! Registers instruments, seeds their price over REST, runs the connection
//! supervisor on a background task and hands out snapshots.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapters::coinbase::rest::PriceSource;
use crate::adapters::coinbase::signing::Credentials;
use crate::adapters::errors::ExchangeResult;
use crate::adapters::shared::{retry_with_backoff, Connector, ReconnectConfig, TlsConnector};
use crate::config::constants::SHUTDOWN_TIMEOUT;
use crate::config::{AppConfig, BookConfig, FeedConfig, TradingPair};

use super::health::{ConnectionHealth, ConnectionState};
use super::registry::{InstrumentRegistry, PairKey, SubscriptionState};
use super::status::StatusSnapshot;
use super::supervisor::ConnectionSupervisor;

pub struct FeedClient {
    feed: FeedConfig,
    book: BookConfig,
    seed_retry: ReconnectConfig,
    registry: Arc<InstrumentRegistry>,
    credentials: Option<Credentials>,
    price_source: Option<Arc<dyn PriceSource>>,
    health: ConnectionHealth,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FeedClient {
    /// `price_source` is optional; without it instruments start with no
    /// last price until the first ticker.
    pub fn new(
        config: &AppConfig,
        credentials: Option<Credentials>,
        price_source: Option<Arc<dyn PriceSource>>,
    ) -> Self {
        if credentials.is_none() {
            tracing::info!("No API credentials, order books will be ticker-derived only");
        }
        Self {
            feed: config.feed.clone(),
            book: config.book.clone(),
            seed_retry: config.rest.retry_config(&config.feed.reconnect),
            registry: Arc::new(InstrumentRegistry::new(config.book.clone())),
            credentials,
            price_source,
            health: ConnectionHealth::new(),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn registry(&self) -> Arc<InstrumentRegistry> {
        self.registry.clone()
    }

    pub fn health(&self) -> ConnectionHealth {
        self.health.clone()
    }

    pub async fn state(&self) -> ConnectionState {
        self.health.state().await
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start tracking `pair`. Idempotent; a running supervisor subscribes
    /// it on its next loop iteration.
    ///
    /// A new pair's last price is seeded from the price source. A failed
    /// seed is logged and does not prevent tracking.
    pub async fn track(&self, pair: TradingPair) -> PairKey {
        let (key, created) = self.registry.register(pair.clone()).await;
        if !created {
            return key;
        }

        if let Some(source) = &self.price_source {
            let label = format!("price seed {}", pair);
            let seeded =
                retry_with_backoff(&self.seed_retry, &label, || source.fetch_buy_price(&pair)).await;
            match seeded {
                Ok(price) => {
                    if let Ok(status) = self.registry.status(key).await {
                        status.seed_price(price).await;
                    }
                    tracing::info!(pair = %pair, price, "Seeded last price");
                }
                Err(e) => {
                    tracing::warn!(pair = %pair, error = %e, "Price seed failed, waiting for ticker");
                }
            }
        }
        key
    }

    /// Connect to the configured host over TLS
    pub fn start(&mut self) {
        let connector = TlsConnector::new(
            self.feed.host.clone(),
            self.feed.port,
            self.feed.connect_timeout(),
        );
        self.start_with(connector);
    }

    /// Start the supervisor with a custom connector. No-op if running.
    pub fn start_with<C>(&mut self, connector: C)
    where
        C: Connector + 'static,
    {
        if self.is_running() {
            tracing::warn!("Feed client already running");
            return;
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }

        let supervisor = ConnectionSupervisor::new(
            connector,
            self.feed.clone(),
            self.registry.clone(),
            self.credentials.clone(),
            self.health.clone(),
            self.cancel.clone(),
        );
        self.task = Some(tokio::spawn(supervisor.run()));
    }

    /// Signal stop and wait for the supervisor to exit
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
            Ok(Ok(())) => tracing::info!("Feed client stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "Supervisor task failed"),
            Err(_) => tracing::warn!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Supervisor did not stop in time"
            ),
        }
    }

    pub async fn subscription_state(&self, key: PairKey) -> ExchangeResult<SubscriptionState> {
        self.registry.state(key).await
    }

    pub async fn snapshot(&self, key: PairKey) -> ExchangeResult<StatusSnapshot> {
        let status = self.registry.status(key).await?;
        Ok(status.snapshot(self.book.display_depth).await)
    }

    /// Snapshots of every tracked instrument, in key order
    pub async fn snapshots(&self) -> Vec<StatusSnapshot> {
        let mut out = Vec::new();
        for status in self.registry.statuses().await {
            out.push(status.snapshot(self.book.display_depth).await);
        }
        out
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
