//! REST spot price source
//!
//! Seeds an instrument's last price before the first ticker arrives.
//! `GET {base_url}/v2/prices/{BASE}-{QUOTE}/buy` answers
//! `{"data": {"base": "BTC", "currency": "USD", "amount": "43000.12"}}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::config::TradingPair;

/// Anything that can quote a current buy price for a pair
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_buy_price(&self, pair: &TradingPair) -> ExchangeResult<f64>;
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    data: PriceData,
}

#[derive(Debug, Deserialize)]
struct PriceData {
    amount: String,
}

pub struct RestPriceSource {
    client: reqwest::Client,
    base_url: String,
}

impl RestPriceSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("book_feed/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn price_url(&self, pair: &TradingPair) -> String {
        format!("{}/v2/prices/{}/buy", self.base_url, pair.product_id())
    }
}

#[async_trait]
impl PriceSource for RestPriceSource {
    async fn fetch_buy_price(&self, pair: &TradingPair) -> ExchangeResult<f64> {
        let url = self.price_url(pair);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExchangeError::ConnectionFailed(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(format!("Failed to read body: {}", e)))?;

        if !status.is_success() {
            return Err(ExchangeError::InvalidResponse(format!(
                "Price API returned {} for {}: {}",
                status, pair, body
            )));
        }

        let parsed: PriceResponse = serde_json::from_str(&body).map_err(|e| {
            ExchangeError::InvalidResponse(format!("Failed to parse price JSON: {} - body: {}", e, body))
        })?;

        let price: f64 = parsed.data.amount.trim().parse().map_err(|e| {
            ExchangeError::InvalidResponse(format!("Invalid amount {:?}: {}", parsed.data.amount, e))
        })?;
        if !price.is_finite() || price <= 0.0 {
            return Err(ExchangeError::InvalidResponse(format!(
                "Non-positive price {} for {}",
                price, pair
            )));
        }

        tracing::debug!(pair = %pair, price, "Fetched REST buy price");
        Ok(price)
    }
}
