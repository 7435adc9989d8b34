//! Service configuration — explicit, loadable, injected.
//!
//! A `ServiceConfig` is constructed once (from defaults, a TOML file, or the
//! `STRATBOX_*` environment) and handed to `ExecutionService::new`. Nothing
//! reads configuration ambiently.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Hard ceiling on any requested execution timeout.
    pub max_timeout_seconds: u64,
    /// Applied when a request asks for a timeout of 0.
    pub default_timeout_seconds: u64,
    /// Starting capital for every backtest.
    pub initial_capital: f64,
    /// Compiled-artifact cache entries.
    pub cache_capacity: usize,
    /// Concurrent guest executions.
    pub worker_threads: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_timeout_seconds: 30,
            default_timeout_seconds: 10,
            initial_capital: 10_000.0,
            cache_capacity: 100,
            worker_threads: 4,
        }
    }
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `STRATBOX_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        env_override(&mut config.max_timeout_seconds, "STRATBOX_MAX_TIMEOUT_SECONDS");
        env_override(
            &mut config.default_timeout_seconds,
            "STRATBOX_DEFAULT_TIMEOUT_SECONDS",
        );
        env_override(&mut config.initial_capital, "STRATBOX_INITIAL_CAPITAL");
        env_override(&mut config.cache_capacity, "STRATBOX_CACHE_CAPACITY");
        env_override(&mut config.worker_threads, "STRATBOX_WORKER_THREADS");
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid("worker_threads must be >= 1".into()));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity must be >= 1".into()));
        }
        if self.default_timeout_seconds == 0
            || self.default_timeout_seconds > self.max_timeout_seconds
        {
            return Err(ConfigError::Invalid(
                "default_timeout_seconds must be in 1..=max_timeout_seconds".into(),
            ));
        }
        if !(self.initial_capital > 0.0) {
            return Err(ConfigError::Invalid("initial_capital must be positive".into()));
        }
        Ok(())
    }
}

fn env_override<T: std::str::FromStr>(slot: &mut T, key: &str) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => warn!(%key, %raw, "ignoring unparsable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ServiceConfig::default().validate().is_ok());
    }

    #[test]
    fn toml_roundtrip_with_partial_file() {
        let config: ServiceConfig =
            toml::from_str("max_timeout_seconds = 60\nworker_threads = 2\n").unwrap();
        assert_eq!(config.max_timeout_seconds, 60);
        assert_eq!(config.worker_threads, 2);
        // Unspecified fields keep their defaults.
        assert_eq!(config.cache_capacity, 100);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = ServiceConfig {
            worker_threads: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn default_timeout_may_not_exceed_maximum() {
        let config = ServiceConfig {
            max_timeout_seconds: 5,
            default_timeout_seconds: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
