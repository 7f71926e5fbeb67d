//! Configuration loader for YAML files
//!
//! This module handles loading and validating configuration from YAML files.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::AppError;

use super::constants;
use super::types::AppConfig;

/// Load configuration from a YAML file
///
/// This function:
/// 1. Checks if the file exists
/// 2. Parses the YAML content
/// 3. Validates the configuration rules
///
/// # Returns
/// * `Ok(AppConfig)` - Successfully loaded and validated configuration
/// * `Err(AppError)` - File not found, parse error, or validation failure
pub fn load_config(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Err(AppError::Config(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let config: AppConfig = serde_yaml::from_reader(reader).map_err(|e| {
        AppError::Config(format!("YAML parse error in '{}': {}", path.display(), e))
    })?;

    config.validate()?;

    Ok(config)
}

/// Load configuration from a YAML string (useful for testing)
pub fn load_config_from_str(yaml_content: &str) -> Result<AppConfig, AppError> {
    let config: AppConfig = serde_yaml::from_str(yaml_content)
        .map_err(|e| AppError::Config(format!("YAML parse error: {}", e)))?;

    config.validate()?;

    Ok(config)
}

/// Path named by `BOOK_FEED_CONFIG`, else `config.yaml`
pub fn config_path_from_env() -> PathBuf {
    std::env::var(constants::CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(constants::DEFAULT_CONFIG_PATH))
}

/// Load the file if it exists, otherwise fall back to validated defaults
pub fn load_config_or_default(path: &Path) -> Result<AppConfig, AppError> {
    if path.exists() {
        return load_config(path);
    }
    tracing::info!(path = %path.display(), "No configuration file, using defaults");
    let config = AppConfig::default();
    config.validate()?;
    Ok(config)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradingPair;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID_CONFIG_YAML: &str = r#"
pairs:
  - BTC-USD
  - ETH-USD
feed:
  host: ws-feed.example.com
  ping_interval_ms: 15000
  silence_timeout_ms: 45000
  reconnect:
    initial_delay_ms: 500
    max_delay_ms: 8000
    jitter_ms: 100
book:
  max_batch_updates: 50
display_interval_ms: 1000
"#;

    #[test]
    fn test_load_config_from_str_valid() {
        let config = load_config_from_str(VALID_CONFIG_YAML).unwrap();
        assert_eq!(config.pairs.len(), 2);
        assert_eq!(config.pairs[1], TradingPair::new("ETH", "USD"));
        assert_eq!(config.feed.host, "ws-feed.example.com");
        assert_eq!(config.feed.ping_interval_ms, 15000);
        assert_eq!(config.feed.reconnect.max_delay_ms, 8000);
        assert_eq!(config.book.max_batch_updates, 50);
        assert_eq!(config.display_interval_ms, 1000);
    }

    #[test]
    #[serial]
    fn test_omitted_fields_use_defaults() {
        std::env::remove_var("WS_READ_TIMEOUT_MS");
        let config = load_config_from_str("pairs: [SOL-USD]").unwrap();
        assert_eq!(config.feed.port, 443);
        assert_eq!(config.feed.read_timeout_ms, 250);
        assert_eq!(config.feed.path, "/");
    }

    #[test]
    fn test_load_config_from_str_invalid_yaml() {
        let result = load_config_from_str("invalid: yaml: content: [");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_load_config_from_str_bad_pair() {
        let result = load_config_from_str("pairs: [BTCUSD]");
        assert!(result.unwrap_err().to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_load_config_from_str_validation_failure() {
        let result = load_config_from_str("pairs: [BTC-USD]\nfeed:\n  path: ws");
        assert!(result.unwrap_err().to_string().contains("feed.path"));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.yaml"));
        assert!(result.unwrap_err().to_string().contains("Configuration file not found"));
    }

    #[test]
    fn test_load_config_from_file_valid() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(VALID_CONFIG_YAML.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.pairs[0].product_id(), "BTC-USD");
    }

    #[test]
    fn test_load_config_from_file_invalid_yaml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"invalid: [yaml: content").unwrap();
        temp_file.flush().unwrap();

        let result = load_config(temp_file.path());
        assert!(result.unwrap_err().to_string().contains("YAML parse error"));
    }

    #[test]
    fn test_load_config_or_default_missing_file() {
        let config = load_config_or_default(Path::new("/nonexistent/book_feed.yaml")).unwrap();
        assert_eq!(config.pairs, vec![TradingPair::new("BTC", "USD")]);
    }

    #[test]
    #[serial]
    fn test_config_path_from_env() {
        std::env::set_var(constants::CONFIG_PATH_ENV, "/tmp/custom.yaml");
        assert_eq!(config_path_from_env(), PathBuf::from("/tmp/custom.yaml"));
        std::env::remove_var(constants::CONFIG_PATH_ENV);
        assert_eq!(config_path_from_env(), PathBuf::from("config.yaml"));
    }
}
