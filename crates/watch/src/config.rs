//! Watcher configuration
//!
//! Loaded from YAML. Every field has a default, so a file only needs the
//! watches themselves. Command-line flags are applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::aggregator::{
    VolumeSettings, DEFAULT_BUCKET_WIDTH_SECS, DEFAULT_COOLDOWN_SECS, DEFAULT_EXCEPTION_PERCENT,
    DEFAULT_INTERVAL_SECS,
};
use crate::binance::connection::DEFAULT_SUBSCRIBE_TIMEOUT;
use crate::binance::BINANCE_WS_URL;
use crate::error::ConfigError;
use crate::scheduler::DEFAULT_CADENCE_SECS;

fn default_url() -> String {
    BINANCE_WS_URL.to_string()
}

fn default_cadence() -> f64 {
    DEFAULT_CADENCE_SECS
}

fn default_subscribe_timeout() -> f64 {
    DEFAULT_SUBSCRIBE_TIMEOUT.as_secs_f64()
}

fn default_interval() -> f64 {
    DEFAULT_INTERVAL_SECS
}

fn default_cooldown() -> f64 {
    DEFAULT_COOLDOWN_SECS
}

fn default_exception_percent() -> f64 {
    DEFAULT_EXCEPTION_PERCENT
}

fn default_bucket_width() -> f64 {
    DEFAULT_BUCKET_WIDTH_SECS
}

/// One tracked instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchEntry {
    pub symbol: String,
    pub threshold: f64,
    #[serde(default = "default_interval")]
    pub interval: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown: f64,
    #[serde(default = "default_exception_percent")]
    pub exception_percent: f64,
    #[serde(default = "default_bucket_width")]
    pub bucket_width: f64,
}

impl WatchEntry {
    pub fn new(symbol: impl Into<String>, threshold: f64) -> Self {
        Self {
            symbol: symbol.into(),
            threshold,
            interval: DEFAULT_INTERVAL_SECS,
            cooldown: DEFAULT_COOLDOWN_SECS,
            exception_percent: DEFAULT_EXCEPTION_PERCENT,
            bucket_width: DEFAULT_BUCKET_WIDTH_SECS,
        }
    }

    pub fn settings(&self) -> VolumeSettings {
        VolumeSettings {
            symbol: self.symbol.clone(),
            threshold: self.threshold,
            interval: self.interval,
            cooldown: self.cooldown,
            exception_percent: self.exception_percent,
            bucket_width: self.bucket_width,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(format!("{}: {}", self.symbol, msg)));

        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("watch with empty symbol".to_string()));
        }
        if !(self.threshold >= 0.0) {
            return invalid("threshold must be non-negative");
        }
        if !(self.interval > 0.0) {
            return invalid("interval must be positive");
        }
        if !(self.bucket_width > 0.0) {
            return invalid("bucket_width must be positive");
        }
        if !(self.cooldown >= 0.0) {
            return invalid("cooldown must be non-negative");
        }
        if !(self.exception_percent >= 0.0) {
            return invalid("exception_percent must be non-negative");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchConfig {
    /// Stream endpoint
    #[serde(default = "default_url")]
    pub url: String,
    /// Seconds between aggregator evaluations
    #[serde(default = "default_cadence")]
    pub cadence_secs: f64,
    /// Seconds to wait for a subscription reply
    #[serde(default = "default_subscribe_timeout")]
    pub subscribe_timeout_secs: f64,
    #[serde(default)]
    pub watches: Vec<WatchEntry>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            cadence_secs: default_cadence(),
            subscribe_timeout_secs: default_subscribe_timeout(),
            watches: Vec::new(),
        }
    }
}

impl WatchConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: WatchConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn subscribe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.subscribe_timeout_secs)
    }

    /// Symbols to subscribe to, deduplicated, in first-seen order
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = Vec::new();
        for watch in &self.watches {
            let symbol = watch.symbol.to_uppercase();
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        symbols
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ConfigError::Invalid(format!("url {:?}: {}", self.url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(format!(
                "url must be ws:// or wss://, got {}",
                self.url
            )));
        }
        if !(self.cadence_secs > 0.0) {
            return Err(ConfigError::Invalid("cadence_secs must be positive".to_string()));
        }
        if !(self.subscribe_timeout_secs > 0.0) || !self.subscribe_timeout_secs.is_finite() {
            return Err(ConfigError::Invalid(
                "subscribe_timeout_secs must be positive".to_string(),
            ));
        }
        if self.watches.is_empty() {
            return Err(ConfigError::Invalid("no watches configured".to_string()));
        }
        for watch in &self.watches {
            watch.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_with_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
watches:
  - symbol: ADAUSDT
    threshold: 100000
  - symbol: btcusdt
    threshold: 50
    interval: 60
    cooldown: 20
"#
        )
        .unwrap();

        let config = WatchConfig::load(file.path()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.url, BINANCE_WS_URL);
        assert_eq!(config.cadence_secs, 1.0);
        assert_eq!(config.subscribe_timeout(), Duration::from_secs(30));
        assert_eq!(config.watches.len(), 2);
        assert_eq!(config.watches[0].interval, 600.0);
        assert_eq!(config.watches[0].cooldown, 3600.0);
        assert_eq!(config.watches[0].bucket_width, 30.0);
        assert_eq!(config.watches[1].interval, 60.0);
        assert_eq!(config.watches[1].cooldown, 20.0);
        assert_eq!(config.symbols(), vec!["ADAUSDT", "BTCUSDT"]);
    }

    #[test]
    fn test_load_missing_file() {
        let result = WatchConfig::load(Path::new("/nonexistent/tradewatch.yaml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_bad_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "watches: [symbol: ").unwrap();
        assert!(matches!(
            WatchConfig::load(file.path()),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = WatchConfig::default();
        assert!(config.validate().is_err());

        config.watches.push(WatchEntry::new("ADAUSDT", 10.0));
        config.validate().unwrap();

        config.url = "https://stream.binance.com".to_string();
        assert!(config.validate().is_err());
        config.url = BINANCE_WS_URL.to_string();

        config.watches[0].bucket_width = 0.0;
        assert!(config.validate().is_err());
        config.watches[0].bucket_width = 1.0;

        config.watches[0].threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_from_entry() {
        let entry = WatchEntry::new("adausdt", 11.0);
        let settings = entry.settings();
        assert_eq!(settings.symbol, "adausdt");
        assert_eq!(settings.threshold, 11.0);
        assert_eq!(settings.exception_percent, 20.0);
    }
}
