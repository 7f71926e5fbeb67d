//! Configuration module
//!
//! This module provides:
//! - Configuration types (`AppConfig`, `FeedConfig`, `BookConfig`, `RestConfig`)
//! - YAML loading functionality (`load_config`)
//! - Logging initialization and log redaction
//! - Application constants with environment variable overrides

pub mod constants;
mod loader;
pub mod logging;
mod types;

pub use types::{
    AppConfig, BookConfig, FeedConfig, ReconnectSettings, RestConfig, TradingPair,
};

pub use loader::{config_path_from_env, load_config, load_config_from_str, load_config_or_default};
