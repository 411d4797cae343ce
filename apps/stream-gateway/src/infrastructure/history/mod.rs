//! History Service Adapter
//!
//! Implements `HistoryPort` against the external price history service:
//! `GET <upstream>?from=<ms>&to=<ms>` returning a JSON array of readings.

use async_trait::async_trait;
use price_bus::PriceReading;

use crate::application::ports::{HistoryError, HistoryPort, HistoryRange};
use crate::infrastructure::config::HistorySettings;

/// HTTP client for the history service.
#[derive(Debug, Clone)]
pub struct HttpHistorySource {
    client: reqwest::Client,
    upstream_url: String,
}

impl HttpHistorySource {
    /// Create a client for the configured upstream.
    ///
    /// # Errors
    ///
    /// Returns `HistoryError::Upstream` if the HTTP client cannot be built.
    pub fn new(settings: &HistorySettings) -> Result<Self, HistoryError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| HistoryError::Upstream {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            upstream_url: settings.upstream_url.clone(),
        })
    }
}

#[async_trait]
impl HistoryPort for HttpHistorySource {
    async fn fetch_range(&self, range: HistoryRange) -> Result<Vec<PriceReading>, HistoryError> {
        let response = self
            .client
            .get(&self.upstream_url)
            .query(&[("from", range.from), ("to", range.to)])
            .send()
            .await
            .map_err(|e| HistoryError::Upstream {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HistoryError::Upstream {
                message: format!("status {}: {body}", status.as_u16()),
            });
        }

        response
            .json::<Vec<PriceReading>>()
            .await
            .map_err(|e| HistoryError::Upstream {
                message: format!("undecodable body: {e}"),
            })
    }
}
