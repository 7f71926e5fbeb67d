//! Subscribe request builders

use crate::adapters::errors::ExchangeResult;
use crate::config::constants::{PRIVATE_CHANNELS, PUBLIC_CHANNELS};

use super::messages::SubscribeRequest;
use super::signing::{sign_subscription, Credentials};

/// Ticker + heartbeat subscription for `product_ids`; `None` when empty
pub fn build_public_subscribe_request(product_ids: &[String]) -> Option<SubscribeRequest> {
    if product_ids.is_empty() {
        return None;
    }
    Some(SubscribeRequest::new(product_ids.to_vec(), PUBLIC_CHANNELS))
}

/// Signed level-2 subscription.
///
/// `Ok(None)` when there are no products or no credentials; the feed then
/// runs on public data only.
pub fn build_private_subscribe_request(
    product_ids: &[String],
    credentials: Option<&Credentials>,
    timestamp: i64,
) -> ExchangeResult<Option<SubscribeRequest>> {
    let Some(credentials) = credentials else {
        return Ok(None);
    };
    if product_ids.is_empty() {
        return Ok(None);
    }

    let auth = sign_subscription(credentials, timestamp)?;
    let mut request = SubscribeRequest::new(product_ids.to_vec(), PRIVATE_CHANNELS);
    request.signature = Some(auth.signature);
    request.key = Some(auth.key);
    request.passphrase = Some(auth.passphrase);
    request.timestamp = Some(auth.timestamp);
    Ok(Some(request))
}
