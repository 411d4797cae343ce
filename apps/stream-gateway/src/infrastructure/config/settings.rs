//! Gateway Configuration Settings
//!
//! Configuration types for the stream gateway, loaded from environment variables.

use std::time::Duration;

use price_bus::RedisStreamSettings;

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Broker URL (`redis://host:port`).
    pub url: String,
    /// Topic carrying price readings.
    pub topic: String,
    /// Consumer group shared by every stream client.
    pub group: String,
    /// How long one broker read blocks waiting for messages.
    pub block: Duration,
    /// Maximum messages fetched per broker read.
    pub batch_size: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            topic: "price-updates".to_string(),
            group: "stock-group".to_string(),
            block: Duration::from_millis(1_000),
            batch_size: 64,
        }
    }
}

impl BrokerSettings {
    /// Adapter tuning derived from these settings.
    #[must_use]
    pub fn redis_settings(&self) -> RedisStreamSettings {
        RedisStreamSettings {
            block: self.block,
            batch_size: self.batch_size,
            ..RedisStreamSettings::default()
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port serving `/stream`, `/history` and the health endpoints.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 3000 }
    }
}

/// Upstream history service settings.
#[derive(Debug, Clone)]
pub struct HistorySettings {
    /// History endpoint; `from` and `to` are appended as query parameters.
    pub upstream_url: String,
    /// Request timeout.
    pub timeout: Duration,
}

/// Per-client stream settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Buffered events per client before it is closed as too slow.
    pub client_buffer: usize,
    /// Interval between SSE keep-alive comments (`None` = disabled).
    pub keep_alive: Option<Duration>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            client_buffer: 256,
            keep_alive: Some(Duration::from_secs(15)),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Broker settings.
    pub broker: BrokerSettings,
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// History service settings.
    pub history: HistorySettings,
    /// Per-client stream settings.
    pub stream: StreamSettings,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or empty, or if a
    /// value cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`GatewayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let upstream_url = env.required("HISTORY_UPSTREAM_URL")?;
        reqwest::Url::parse(&upstream_url).map_err(|e| ConfigError::InvalidValue {
            key: "HISTORY_UPSTREAM_URL".to_string(),
            message: e.to_string(),
        })?;

        let broker_defaults = BrokerSettings::default();
        let broker = BrokerSettings {
            url: env.string("BROKER_URL", &broker_defaults.url),
            topic: env.string("PRICE_TOPIC", &broker_defaults.topic),
            group: env.string("CONSUMER_GROUP", &broker_defaults.group),
            block: env.duration_millis("BROKER_BLOCK_MS", broker_defaults.block)?,
            batch_size: env.parse("BROKER_BATCH_SIZE", broker_defaults.batch_size)?,
        };

        let server = ServerSettings {
            http_port: env.parse("GATEWAY_HTTP_PORT", ServerSettings::default().http_port)?,
        };

        let history = HistorySettings {
            upstream_url,
            timeout: env.duration_millis("HISTORY_TIMEOUT_MS", Duration::from_millis(10_000))?,
        };

        let keep_alive_secs: u64 = env.parse("SSE_KEEP_ALIVE_SECS", 15)?;
        let stream = StreamSettings {
            client_buffer: env
                .parse("CLIENT_BUFFER_CAPACITY", StreamSettings::default().client_buffer)?
                .max(1),
            keep_alive: (keep_alive_secs > 0).then(|| Duration::from_secs(keep_alive_secs)),
        };

        Ok(Self {
            broker,
            server,
            history,
            stream,
        })
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

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = (self.0)(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn string(&self, key: &str, default: &str) -> String {
        (self.0)(key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(key).filter(|v| !v.trim().is_empty()) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{raw:?}: {e}"),
            }),
        }
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let millis = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.parse(key, millis).map(Duration::from_millis)
    }
}
