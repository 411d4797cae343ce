//! Port Interfaces
//!
//! ## Driven Ports (Outbound)
//!
//! - `HistoryPort`: historical price readings for a time range
//!
//! The broker port lives in `price_bus` and is shared with the producer.

use async_trait::async_trait;
use price_bus::PriceReading;

/// Client-facing message for absent or empty range bounds.
pub const MISSING_BOUNDS_MESSAGE: &str = "Missing \"from\" or \"to\" query paramaters.";

/// Client-facing message for bounds that are not epoch milliseconds.
pub const INVALID_BOUNDS_MESSAGE: &str = "Invalid \"from\" or \"to\" query parameters.";

/// Client-facing message for any upstream failure.
pub const UPSTREAM_FAILURE_MESSAGE: &str = "Failed to fetch historical data";

/// History lookup error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// `from` or `to` was absent or empty.
    #[error("missing history range bounds")]
    MissingBounds,

    /// `from` or `to` was not an integer.
    #[error("invalid history range bounds: {message}")]
    InvalidBounds {
        /// Error details.
        message: String,
    },

    /// The history service failed (network, status, or body).
    #[error("history upstream failed: {message}")]
    Upstream {
        /// Error details.
        message: String,
    },
}

impl HistoryError {
    /// Message returned to HTTP clients.
    #[must_use]
    pub const fn client_message(&self) -> &'static str {
        match self {
            Self::MissingBounds => MISSING_BOUNDS_MESSAGE,
            Self::InvalidBounds { .. } => INVALID_BOUNDS_MESSAGE,
            Self::Upstream { .. } => UPSTREAM_FAILURE_MESSAGE,
        }
    }

    /// Whether the caller is at fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Upstream { .. })
    }
}

/// Inclusive time range in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRange {
    /// Range start.
    pub from: i64,
    /// Range end.
    pub to: i64,
}

impl HistoryRange {
    /// Build a range from raw query values.
    ///
    /// # Errors
    ///
    /// Returns `MissingBounds` if either value is absent or empty, and
    /// `InvalidBounds` if either is not an integer.
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self, HistoryError> {
        let (Some(from), Some(to)) = (non_empty(from), non_empty(to)) else {
            return Err(HistoryError::MissingBounds);
        };

        Ok(Self {
            from: parse_bound("from", from)?,
            to: parse_bound("to", to)?,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_bound(name: &str, value: &str) -> Result<i64, HistoryError> {
    value
        .parse()
        .map_err(|_| HistoryError::InvalidBounds {
            message: format!("{name}={value} is not epoch milliseconds"),
        })
}

/// Port for the external price history service.
#[async_trait]
pub trait HistoryPort: Send + Sync {
    /// Fetch readings in `range`, ordered as the service returns them.
    async fn fetch_range(&self, range: HistoryRange) -> Result<Vec<PriceReading>, HistoryError>;
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn parses_numeric_bounds() {
        let range = HistoryRange::parse(Some("1000"), Some("2000")).unwrap();
        assert_eq!(range, HistoryRange { from: 1000, to: 2000 });
    }

    #[test_case(None, Some("1") ; "missing from")]
    #[test_case(Some("1"), None ; "missing to")]
    #[test_case(None, None ; "missing both")]
    #[test_case(Some(""), Some("1") ; "empty from")]
    #[test_case(Some("1"), Some("  ") ; "blank to")]
    fn missing_bounds(from: Option<&str>, to: Option<&str>) {
        assert_eq!(HistoryRange::parse(from, to), Err(HistoryError::MissingBounds));
    }

    #[test_case(Some("abc"), Some("1") ; "alphabetic from")]
    #[test_case(Some("1"), Some("1.5") ; "fractional to")]
    fn invalid_bounds(from: Option<&str>, to: Option<&str>) {
        let err = HistoryRange::parse(from, to).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidBounds { .. }));
        assert!(err.is_client_error());
    }

    #[test]
    fn client_messages() {
        assert_eq!(
            HistoryError::MissingBounds.client_message(),
            "Missing \"from\" or \"to\" query paramaters."
        );
        let upstream = HistoryError::Upstream {
            message: "boom".to_string(),
        };
        assert_eq!(upstream.client_message(), "Failed to fetch historical data");
        assert!(!upstream.is_client_error());
    }
}
