//! Price Reading
//!
//! The atomic unit of market data exchanged through the pipeline. The same
//! JSON encoding is used for the broker message value and the server-sent
//! event payload, so the gateway never re-shapes what the producer wrote.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single price observation for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceReading {
    /// Instrument symbol.
    pub symbol: String,
    /// Observed price.
    pub price: f64,
    /// Observation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl PriceReading {
    /// Create a new reading.
    #[must_use]
    pub fn new(symbol: impl Into<String>, price: f64, timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
        }
    }

    /// Encode as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::NonFinitePrice` for NaN or infinite prices, which
    /// JSON cannot represent.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if !self.price.is_finite() {
            return Err(CodecError::NonFinitePrice(self.price));
        }
        Ok(serde_json::to_vec(self)?)
    }

    /// Encode as a JSON string.
    ///
    /// # Errors
    ///
    /// Same conditions as [`PriceReading::encode`].
    pub fn to_json(&self) -> Result<String, CodecError> {
        if !self.price.is_finite() {
            return Err(CodecError::NonFinitePrice(self.price));
        }
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Json` if the payload is not a valid reading.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Observation time as a UTC datetime, if the timestamp is in range.
    #[must_use]
    pub fn observed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Reading encode/decode failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON serialization failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Price cannot be represented in JSON.
    #[error("price is not a finite number: {0}")]
    NonFinitePrice(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_wire_shape() {
        let reading = PriceReading::new("X", 101.5, 1000);
        let json = reading.to_json().unwrap();
        assert_eq!(json, r#"{"symbol":"X","price":101.5,"timestamp":1000}"#);
    }

    #[test]
    fn decode_inverts_encode() {
        let reading = PriceReading::new("HEAT", 102.0, 2000);
        let bytes = reading.encode().unwrap();
        assert_eq!(PriceReading::decode(&bytes).unwrap(), reading);
    }

    #[test]
    fn decode_rejects_missing_fields() {
        let result = PriceReading::decode(br#"{"symbol":"X","price":1.0}"#);
        assert!(matches!(result, Err(CodecError::Json(_))));
    }

    #[test]
    fn decode_accepts_integer_price() {
        let reading = PriceReading::decode(br#"{"symbol":"X","price":100,"timestamp":5}"#).unwrap();
        assert_eq!(reading.price, 100.0);
    }

    #[test]
    fn non_finite_price_is_rejected() {
        let reading = PriceReading::new("X", f64::NAN, 1);
        assert!(matches!(
            reading.encode(),
            Err(CodecError::NonFinitePrice(_))
        ));
        assert!(reading.to_json().is_err());
    }

    #[test]
    fn observed_at_converts_millis() {
        let reading = PriceReading::new("X", 1.0, 1_700_000_000_123);
        let at = reading.observed_at().unwrap();
        assert_eq!(at.timestamp_millis(), 1_700_000_000_123);
    }
}
