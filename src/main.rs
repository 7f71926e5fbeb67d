//! Book feed entry point
//!
//! 1. Environment + logging initialization
//! 2. Configuration load (`BOOK_FEED_CONFIG`, default `config.yaml`)
//! 3. Feed client start and instrument tracking
//! 4. Periodic status output
//! 5. Ctrl+C graceful shutdown

use std::sync::Arc;

use tracing::{error, info};

use book_feed::adapters::coinbase::{Credentials, PriceSource, RestPriceSource};
use book_feed::config::logging::init_logging;
use book_feed::config::{config_path_from_env, load_config_or_default};
use book_feed::core::FeedClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // =========================================================================
    // 1. Environment + logging
    // =========================================================================
    dotenvy::dotenv().ok();
    init_logging();

    info!("=== Book feed starting ===");

    // =========================================================================
    // 2. Configuration
    // =========================================================================
    let config_path = config_path_from_env();
    let config = match load_config_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "Configuration failed");
            return Err(e.into());
        }
    };
    info!(
        pairs = ?config.pairs.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        host = %config.feed.host,
        "Configuration loaded"
    );

    // =========================================================================
    // 3. Feed client
    // =========================================================================
    let credentials = Credentials::from_env();
    let price_source: Arc<dyn PriceSource> =
        Arc::new(RestPriceSource::new(config.rest.base_url.clone(), config.rest.timeout()));
    let mut client = FeedClient::new(&config, credentials, Some(price_source));

    client.start();
    for pair in &config.pairs {
        client.track(pair.clone()).await;
    }

    // =========================================================================
    // 4. Status output until Ctrl+C
    // =========================================================================
    let mut ticker = tokio::time::interval(config.display_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let state = client.state().await;
                for snapshot in client.snapshots().await {
                    info!(connection = %state, "{}", snapshot);
                }
            }
        }
    }

    // =========================================================================
    // 5. Shutdown
    // =========================================================================
    client.shutdown().await;
    info!("Clean exit");
    Ok(())
}
