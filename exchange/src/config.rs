//! Exchange configuration.
//!
//! Loaded once at application start and handed to every [`TargetHandler`](crate::TargetHandler).
//!
//! # Example
//!
//! ```
//! use tool_exchange::config::{Deployment, ExchangeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ExchangeConfig::from_lookup(|key| match key {
//!     "EXCHANGE_ENV" => Some("prod".to_string()),
//!     "EXCHANGE_AUTO_OPEN" => Some("true".to_string()),
//!     _ => None,
//! })?;
//!
//! assert_eq!(config.environment, Deployment::Production);
//! assert!(config.auto_open_review);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tool_exchange_runtime::StoreConfig;

/// Selects the deployment environment
pub const ENV_VAR: &str = "EXCHANGE_ENV";
/// Enables opening the review automatically when signals arrive
pub const AUTO_OPEN_VAR: &str = "EXCHANGE_AUTO_OPEN";
/// Overrides the handler's action broadcast capacity
pub const BROADCAST_CAPACITY_VAR: &str = "EXCHANGE_BROADCAST_CAPACITY";

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Unknown deployment environment
    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    /// A variable was set but could not be parsed
    #[error("failed to parse {var}: {value}")]
    Parse {
        /// Variable name
        var: String,
        /// Rejected value
        value: String,
    },

    /// Configuration validation failed
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    /// Local development
    #[default]
    Development,
    /// Production
    Production,
}

impl Deployment {
    /// Parse an environment name
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvironment`] for an unknown name.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidEnvironment(value.to_string())),
        }
    }

    /// Check if this is the production environment
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Default `tracing` filter for this environment
    #[must_use]
    pub const fn log_filter(self) -> &'static str {
        match self {
            Self::Development => "tool_exchange=debug,tool_exchange_runtime=debug,info",
            Self::Production => "tool_exchange=info,warn",
        }
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// Settings shared by every target handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Deployment environment
    pub environment: Deployment,
    /// Open the review as soon as signals are pending, unless deferred
    pub auto_open_review: bool,
    /// Capacity of each handler's action broadcast channel
    pub broadcast_capacity: usize,
    /// How long shutdown waits for in-flight accepts
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            environment: Deployment::Development,
            auto_open_review: false,
            broadcast_capacity: 16,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl ExchangeConfig {
    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps variable names to values
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is malformed or the result is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup(ENV_VAR)
            .map(|value| Deployment::parse(&value))
            .transpose()?
            .unwrap_or_default();

        let mut config = Self::for_environment(environment);

        if let Some(value) = lookup(AUTO_OPEN_VAR) {
            config.auto_open_review = parse_bool(AUTO_OPEN_VAR, &value)?;
        }
        if let Some(value) = lookup(BROADCAST_CAPACITY_VAR) {
            config.broadcast_capacity = value.trim().parse().map_err(|_| ConfigError::Parse {
                var: BROADCAST_CAPACITY_VAR.to_string(),
                value: value.clone(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Defaults for `environment`
    #[must_use]
    pub fn for_environment(environment: Deployment) -> Self {
        let mut config = Self {
            environment,
            ..Self::default()
        };
        if environment.is_production() {
            config.broadcast_capacity = 64;
            config.shutdown_timeout = Duration::from_secs(30);
        }
        config
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broadcast_capacity == 0 {
            return Err(ConfigError::Validation(
                "broadcast_capacity must be > 0".to_string(),
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "shutdown_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Runtime store settings derived from this configuration
    #[must_use]
    pub const fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.broadcast_capacity, self.shutdown_timeout)
    }

    /// Default `tracing` filter for the configured environment
    #[must_use]
    pub const fn log_filter(&self) -> &'static str {
        self.environment.log_filter()
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Parse {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = ExchangeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ExchangeConfig::default());
        assert!(!config.auto_open_review);
    }

    #[test]
    fn test_production_overrides() {
        let config = ExchangeConfig::from_lookup(lookup(&[("EXCHANGE_ENV", "Production")])).unwrap();
        assert!(config.environment.is_production());
        assert_eq!(config.broadcast_capacity, 64);
        assert_eq!(config.store_config().broadcast_capacity, 64);
    }

    #[test]
    fn test_explicit_variables() {
        let config = ExchangeConfig::from_lookup(lookup(&[
            ("EXCHANGE_AUTO_OPEN", "yes"),
            ("EXCHANGE_BROADCAST_CAPACITY", " 8 "),
        ]))
        .unwrap();
        assert!(config.auto_open_review);
        assert_eq!(config.broadcast_capacity, 8);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert_eq!(
            ExchangeConfig::from_lookup(lookup(&[("EXCHANGE_ENV", "staging")])),
            Err(ConfigError::InvalidEnvironment("staging".to_string()))
        );
        assert!(matches!(
            ExchangeConfig::from_lookup(lookup(&[("EXCHANGE_AUTO_OPEN", "maybe")])),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            ExchangeConfig::from_lookup(lookup(&[("EXCHANGE_BROADCAST_CAPACITY", "0")])),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let json = r#"{"environment":"production","autoOpenReview":true}"#;
        let config: ExchangeConfig = serde_json::from_str(json).unwrap();
        // Field names are snake_case; unknown keys are ignored.
        assert_eq!(config.environment, Deployment::Production);
        assert!(!config.auto_open_review);

        let encoded = serde_json::to_string(&ExchangeConfig::default()).unwrap();
        let decoded: ExchangeConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, ExchangeConfig::default());
    }
}
