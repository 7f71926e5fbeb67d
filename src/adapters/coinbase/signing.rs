//! Feed authentication
//!
//! A signed subscription carries `signature`, `key`, `passphrase` and
//! `timestamp`. The signature is the base64 HMAC-SHA256 of
//! `timestamp + "GET" + "/users/self/verify"`, keyed with the base64-decoded
//! API secret.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::config::constants;
use crate::config::logging::SanitizedValue;

type HmacSha256 = Hmac<Sha256>;

/// API credentials for the private channels
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    /// Base64-encoded HMAC secret
    secret: String,
    passphrase: String,
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
        }
    }

    /// Read `BOOK_FEED_API_KEY` / `_SECRET` / `_PASSPHRASE`.
    ///
    /// Returns `None` unless all three are set and non-empty.
    pub fn from_env() -> Option<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Some(Self::new(
            read(constants::API_KEY_ENV)?,
            read(constants::API_SECRET_ENV)?,
            read(constants::API_PASSPHRASE_ENV)?,
        ))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &SanitizedValue::new(&self.api_key).to_string())
            .field("secret", &"REDACTED")
            .field("passphrase", &"REDACTED")
            .finish()
    }
}

/// Auth fields attached to a signed subscription
#[derive(Clone, PartialEq, Eq)]
pub struct AuthFields {
    pub signature: String,
    pub key: String,
    pub passphrase: String,
    pub timestamp: String,
}

impl fmt::Debug for AuthFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthFields")
            .field("signature", &SanitizedValue::new(&self.signature).to_string())
            .field("key", &SanitizedValue::new(&self.key).to_string())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Base64 HMAC-SHA256 of `message`, keyed with the base64-decoded `secret_b64`
pub fn hmac_sha256_base64(secret_b64: &str, message: &str) -> ExchangeResult<String> {
    let key = BASE64
        .decode(secret_b64.trim())
        .map_err(|e| ExchangeError::Signing(format!("API secret is not valid base64: {}", e)))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| ExchangeError::Signing(format!("Invalid HMAC key: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// `timestamp + "GET" + "/users/self/verify"`
pub fn verify_message(timestamp: i64) -> String {
    format!("{}GET{}", timestamp, constants::AUTH_VERIFY_PATH)
}

/// Sign the feed verification request for `timestamp` (unix seconds)
pub fn sign_subscription(credentials: &Credentials, timestamp: i64) -> ExchangeResult<AuthFields> {
    let signature = hmac_sha256_base64(&credentials.secret, &verify_message(timestamp))?;
    tracing::debug!(
        api_key = %SanitizedValue::new(&credentials.api_key),
        timestamp,
        "Signed feed subscription"
    );
    Ok(AuthFields {
        signature,
        key: credentials.api_key.clone(),
        passphrase: credentials.passphrase.clone(),
        timestamp: timestamp.to_string(),
    })
}
