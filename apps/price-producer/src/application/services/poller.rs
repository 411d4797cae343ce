//! Price Poller
//!
//! Fetches the current reading from the upstream source on a fixed interval
//! and publishes it to the price topic keyed by symbol.
//!
//! # Scheduling
//!
//! ```text
//! start ──interval──► tick ──interval──► tick ──interval──► tick ...
//!                      │                  │
//!                      └─ spawned ─┐      └─ spawned ─┐
//!                        fetch → publish     fetch → publish
//! ```
//!
//! The first tick fires one interval after start. Each tick runs as its own
//! task, so a slow upstream never delays the schedule. Failures are logged and
//! swallowed; the next tick runs regardless. On cancellation no further ticks
//! are scheduled and in-flight ones are awaited.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use price_bus::{BrokerError, PriceReading, SharedBroker, publish_reading};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{PriceSourcePort, SourceError};
use crate::infrastructure::metrics::{self, PollOutcome};

// =============================================================================
// Errors
// =============================================================================

/// Failure of a single poll.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProducerError {
    /// Upstream could not be reached or answered with a non-success status.
    #[error("fetch failed: {message}")]
    Fetch {
        /// Error details.
        message: String,
    },

    /// Upstream answered but the body was not a usable reading.
    #[error("parse failed: {message}")]
    Parse {
        /// Error details.
        message: String,
    },

    /// The reading could not be published to the broker.
    #[error("publish failed: {message}")]
    Publish {
        /// Error details.
        message: String,
    },
}

impl ProducerError {
    /// Metric outcome for this failure.
    #[must_use]
    pub const fn outcome(&self) -> PollOutcome {
        match self {
            Self::Fetch { .. } => PollOutcome::FetchFailed,
            Self::Parse { .. } => PollOutcome::ParseFailed,
            Self::Publish { .. } => PollOutcome::PublishFailed,
        }
    }
}

impl From<SourceError> for ProducerError {
    fn from(err: SourceError) -> Self {
        let message = err.to_string();
        match err {
            SourceError::Parse { .. } => Self::Parse { message },
            SourceError::Network { .. } | SourceError::Status { .. } => Self::Fetch { message },
        }
    }
}

impl From<BrokerError> for ProducerError {
    fn from(err: BrokerError) -> Self {
        Self::Publish {
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Time between ticks. Must be non-zero.
    pub interval: Duration,
    /// Topic readings are published to.
    pub topic: String,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            topic: "price-updates".to_string(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Running tick counters.
#[derive(Debug, Default)]
pub struct PollStats {
    started: AtomicU64,
    completed: AtomicU64,
    published: AtomicU64,
    fetch_failures: AtomicU64,
    parse_failures: AtomicU64,
    publish_failures: AtomicU64,
    consecutive_failures: AtomicU64,
    last_published_ms: AtomicI64,
    last_error: Mutex<Option<String>>,
}

/// Point-in-time view of [`PollStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollSnapshot {
    /// Ticks that began.
    pub ticks_started: u64,
    /// Ticks that finished, successfully or not.
    pub ticks_completed: u64,
    /// Readings published.
    pub published: u64,
    /// Ticks that failed to fetch.
    pub fetch_failures: u64,
    /// Ticks whose upstream payload was unusable.
    pub parse_failures: u64,
    /// Ticks that failed to publish.
    pub publish_failures: u64,
    /// Failed polls since the last successful one.
    pub consecutive_failures: u64,
    /// Timestamp of the last published reading.
    pub last_published_ms: Option<i64>,
    /// Most recent tick failure.
    pub last_error: Option<String>,
}

impl PollStats {
    fn record(&self, result: &Result<PriceReading, ProducerError>) {
        match result {
            Ok(reading) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.last_published_ms
                    .store(reading.timestamp, Ordering::Relaxed);
            }
            Err(err) => {
                let counter = match err {
                    ProducerError::Fetch { .. } => &self.fetch_failures,
                    ProducerError::Parse { .. } => &self.parse_failures,
                    ProducerError::Publish { .. } => &self.publish_failures,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                *self.last_error.lock() = Some(err.to_string());
            }
        }
    }

    /// Current counter values.
    #[must_use]
    pub fn snapshot(&self) -> PollSnapshot {
        let published = self.published.load(Ordering::Relaxed);
        PollSnapshot {
            ticks_started: self.started.load(Ordering::Relaxed),
            ticks_completed: self.completed.load(Ordering::Relaxed),
            published,
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_published_ms: (published > 0)
                .then(|| self.last_published_ms.load(Ordering::Relaxed)),
            last_error: self.last_error.lock().clone(),
        }
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Fixed-interval fetch and publish loop.
pub struct PricePoller {
    source: Arc<dyn PriceSourcePort>,
    broker: SharedBroker,
    settings: PollerSettings,
    stats: PollStats,
}

impl PricePoller {
    /// Create a poller.
    #[must_use]
    pub fn new(
        source: Arc<dyn PriceSourcePort>,
        broker: SharedBroker,
        settings: PollerSettings,
    ) -> Self {
        Self {
            source,
            broker,
            settings,
            stats: PollStats::default(),
        }
    }

    /// Tick counters.
    #[must_use]
    pub const fn stats(&self) -> &PollStats {
        &self.stats
    }

    /// Fetch one reading and publish it.
    ///
    /// # Errors
    ///
    /// Returns `ProducerError::Fetch` or `ProducerError::Parse` when the
    /// upstream call fails, `ProducerError::Publish` when the broker rejects
    /// the reading.
    pub async fn poll_once(&self) -> Result<PriceReading, ProducerError> {
        let started = Instant::now();
        let result = self.fetch_and_publish().await;

        self.stats.record(&result);
        let outcome = result
            .as_ref()
            .map_or_else(ProducerError::outcome, |_| PollOutcome::Published);
        metrics::record_poll(outcome, started.elapsed());

        match &result {
            Ok(reading) => {
                metrics::set_last_published(reading.timestamp);
                tracing::debug!(
                    symbol = %reading.symbol,
                    price = reading.price,
                    timestamp = reading.timestamp,
                    "Published price reading"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, outcome = outcome.as_str(), "Poll failed");
            }
        }

        result
    }

    async fn fetch_and_publish(&self) -> Result<PriceReading, ProducerError> {
        let reading = self.source.fetch().await?;
        publish_reading(self.broker.as_ref(), &self.settings.topic, &reading).await?;
        Ok(reading)
    }

    async fn tick(&self) {
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        // Errors are already logged and counted.
        let _ = self.poll_once().await;
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Poll until cancelled, then wait for in-flight ticks.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.settings.interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut in_flight = JoinSet::new();

        tracing::info!(
            interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            topic = %self.settings.topic,
            "Poller started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let poller = Arc::clone(&self);
                    in_flight.spawn(async move { poller.tick().await });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_join(joined);
                }
            }
        }

        if !in_flight.is_empty() {
            tracing::info!(in_flight = in_flight.len(), "Waiting for in-flight polls");
        }
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }

        tracing::info!("Poller stopped");
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Poll task failed");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use price_bus::MemoryBroker;
    use test_case::test_case;

    use super::*;

    struct FixedSource(Result<PriceReading, SourceError>);

    #[async_trait]
    impl PriceSourcePort for FixedSource {
        async fn fetch(&self) -> Result<PriceReading, SourceError> {
            self.0.clone()
        }
    }

    fn poller(
        source: Result<PriceReading, SourceError>,
        broker: Arc<MemoryBroker>,
    ) -> PricePoller {
        PricePoller::new(
            Arc::new(FixedSource(source)),
            broker,
            PollerSettings::default(),
        )
    }

    #[test_case(SourceError::Network { message: "refused".into() } => matches ProducerError::Fetch { .. } ; "network")]
    #[test_case(SourceError::Status { status: 503, message: String::new() } => matches ProducerError::Fetch { .. } ; "status")]
    #[test_case(SourceError::Parse { message: "bad".into() } => matches ProducerError::Parse { .. } ; "parse")]
    fn source_errors_map_to_producer_errors(err: SourceError) -> ProducerError {
        err.into()
    }

    #[tokio::test]
    async fn poll_once_publishes_keyed_by_symbol() {
        let broker = Arc::new(MemoryBroker::new());
        let reading = PriceReading::new("HEAT", 101.25, 1_700_000_000_000);
        let poller = poller(Ok(reading.clone()), Arc::clone(&broker));

        assert_eq!(poller.poll_once().await.unwrap(), reading);

        let messages = broker.messages("price-updates");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.as_deref(), Some("HEAT"));
        assert_eq!(messages[0].reading().unwrap(), reading);

        let stats = poller.stats().snapshot();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.last_published_ms, Some(1_700_000_000_000));
        assert_eq!(stats.last_error, None);
    }

    #[tokio::test]
    async fn broker_unavailable_is_publish_error() {
        let broker = Arc::new(MemoryBroker::new());
        broker.set_available(false);
        let poller = poller(Ok(PriceReading::new("HEAT", 1.0, 1)), Arc::clone(&broker));

        let err = poller.poll_once().await.unwrap_err();
        assert!(matches!(err, ProducerError::Publish { .. }));

        let stats = poller.stats().snapshot();
        assert_eq!(stats.publish_failures, 1);
        assert_eq!(stats.consecutive_failures, 1);
        assert_eq!(stats.published, 0);
        assert_eq!(stats.last_published_ms, None);
        assert!(stats.last_error.is_some());
    }

    #[tokio::test]
    async fn fetch_failure_publishes_nothing() {
        let broker = Arc::new(MemoryBroker::new());
        let poller = poller(
            Err(SourceError::Network {
                message: "timed out".into(),
            }),
            Arc::clone(&broker),
        );

        assert!(matches!(
            poller.poll_once().await,
            Err(ProducerError::Fetch { .. })
        ));
        assert_eq!(broker.published_count("price-updates"), 0);
        assert_eq!(poller.stats().snapshot().fetch_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_interval() {
        let broker = Arc::new(MemoryBroker::new());
        let poller = Arc::new(poller(
            Ok(PriceReading::new("HEAT", 1.0, 1)),
            Arc::clone(&broker),
        ));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&poller).run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(broker.published_count("price-updates"), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(broker.published_count("price-updates"), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(broker.published_count("price-updates"), 3);

        cancel.cancel();
        task.await.unwrap();

        let stats = poller.stats().snapshot();
        assert_eq!(stats.ticks_started, 3);
        assert_eq!(stats.ticks_completed, 3);
    }
}
