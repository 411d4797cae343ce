//! Upstream Price Source Adapter
//!
//! Implements `PriceSourcePort` against the upstream current-price endpoint.
//!
//! # Payload
//!
//! ```json
//! { "symbol": "HEAT", "price": 101.25, "timestamp": 1700000000000 }
//! ```
//!
//! `timestamp` may also be an RFC 3339 string, and must name a representable
//! UTC instant. A missing `symbol` falls back to the configured one.

use async_trait::async_trait;
use chrono::DateTime;
use price_bus::PriceReading;
use serde::Deserialize;

use crate::application::ports::{PriceSourcePort, SourceError};
use crate::infrastructure::config::UpstreamSettings;

#[derive(Debug, Deserialize)]
struct UpstreamQuote {
    #[serde(default)]
    symbol: Option<String>,
    price: f64,
    timestamp: UpstreamTimestamp,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UpstreamTimestamp {
    Millis(i64),
    Text(String),
}

impl UpstreamTimestamp {
    fn to_millis(&self) -> Result<i64, SourceError> {
        match self {
            Self::Millis(ms) => Ok(*ms),
            Self::Text(text) => {
                let text = text.trim();
                if let Ok(ms) = text.parse::<i64>() {
                    return Ok(ms);
                }
                DateTime::parse_from_rfc3339(text)
                    .map(|dt| dt.timestamp_millis())
                    .map_err(|e| SourceError::Parse {
                        message: format!("timestamp {text:?}: {e}"),
                    })
            }
        }
    }
}

/// HTTP client for the upstream price endpoint.
#[derive(Debug, Clone)]
pub struct HttpPriceSource {
    client: reqwest::Client,
    url: String,
    symbol: String,
}

impl HttpPriceSource {
    /// Create a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Network` if the HTTP client cannot be built.
    pub fn new(settings: &UpstreamSettings) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| SourceError::Network {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: settings.url.clone(),
            symbol: settings.symbol.clone(),
        })
    }

    fn reading_from(&self, quote: UpstreamQuote) -> Result<PriceReading, SourceError> {
        if !quote.price.is_finite() {
            return Err(SourceError::Parse {
                message: format!("price {} is not finite", quote.price),
            });
        }

        let timestamp = quote.timestamp.to_millis()?;
        let symbol = quote
            .symbol
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.symbol.clone());

        let reading = PriceReading::new(symbol, quote.price, timestamp);
        if reading.observed_at().is_none() {
            return Err(SourceError::Parse {
                message: format!("timestamp {timestamp} is out of range"),
            });
        }
        Ok(reading)
    }
}

#[async_trait]
impl PriceSourcePort for HttpPriceSource {
    async fn fetch(&self) -> Result<PriceReading, SourceError> {
        let response =
            self.client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| SourceError::Network {
                    message: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| SourceError::Network {
            message: e.to_string(),
        })?;

        let quote: UpstreamQuote =
            serde_json::from_slice(&bytes).map_err(|e| SourceError::Parse {
                message: e.to_string(),
            })?;

        self.reading_from(quote)
    }
}
