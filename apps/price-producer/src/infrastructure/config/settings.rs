//! Producer Configuration Settings
//!
//! Typed settings for the price producer, loaded from environment variables.

use std::time::Duration;

use price_bus::RedisStreamSettings;

use crate::application::services::PollerSettings;

/// Upstream price endpoint settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Current-price endpoint.
    pub url: String,
    /// Symbol used when the upstream payload omits one.
    pub symbol: String,
    /// Request timeout.
    pub timeout: Duration,
}

/// Broker settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Broker URL (`redis://host:port`).
    pub url: String,
    /// Topic readings are published to.
    pub topic: String,
    /// Approximate number of readings retained on the topic.
    pub max_len: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            topic: "price-updates".to_string(),
            max_len: 1_000,
        }
    }
}

impl BrokerSettings {
    /// Adapter tuning derived from these settings.
    #[must_use]
    pub fn redis_settings(&self) -> RedisStreamSettings {
        RedisStreamSettings {
            max_len: self.max_len,
            ..RedisStreamSettings::default()
        }
    }
}

/// Complete producer configuration.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Upstream price endpoint.
    pub upstream: UpstreamSettings,
    /// Broker settings.
    pub broker: BrokerSettings,
    /// Time between polls.
    pub poll_interval: Duration,
    /// Port serving `/health`, `/healthz` and `/metrics`.
    pub health_port: u16,
}

impl ProducerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `UPSTREAM_PRICE_URL` is missing, empty or not a
    /// URL, or if a numeric variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ProducerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = required_env(&lookup, "UPSTREAM_PRICE_URL")?;
        if let Err(e) = reqwest::Url::parse(&url) {
            return Err(ConfigError::InvalidValue {
                key: "UPSTREAM_PRICE_URL".to_string(),
                message: e.to_string(),
            });
        }

        let upstream = UpstreamSettings {
            url,
            symbol: parse_env_string(&lookup, "PRICE_SYMBOL", "HEAT"),
            timeout: Duration::from_millis(parse_env_u64(&lookup, "UPSTREAM_TIMEOUT_MS", 4_000)?),
        };

        let defaults = BrokerSettings::default();
        let broker = BrokerSettings {
            url: parse_env_string(&lookup, "BROKER_URL", &defaults.url),
            topic: parse_env_string(&lookup, "PRICE_TOPIC", &defaults.topic),
            max_len: parse_env(&lookup, "TOPIC_MAX_LEN", defaults.max_len)?,
        };

        let interval_ms = parse_env_u64(&lookup, "POLL_INTERVAL_MS", 5_000)?;
        if interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "POLL_INTERVAL_MS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            upstream,
            broker,
            poll_interval: Duration::from_millis(interval_ms),
            health_port: parse_env(&lookup, "PRODUCER_HEALTH_PORT", 8083)?,
        })
    }

    /// Poller settings derived from this configuration.
    #[must_use]
    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            interval: self.poll_interval,
            topic: self.broker.topic.clone(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} is invalid: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parse error details.
        message: String,
    },
}

fn required_env<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Err(ConfigError::MissingEnvVar(key.to_string())),
        Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
        Some(v) => Ok(v.trim().to_string()),
    }
}

fn parse_env_string<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(default);
    };
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}

fn parse_env_u64<F>(lookup: &F, key: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_env(lookup, key, default)
}
