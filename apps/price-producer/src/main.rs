//! Price Producer Binary
//!
//! Polls the upstream price endpoint and publishes readings to the broker.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-producer
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `UPSTREAM_PRICE_URL`: Current-price endpoint
//!
//! ## Optional
//! - `PRICE_SYMBOL`: Symbol when the upstream omits one (default: HEAT)
//! - `POLL_INTERVAL_MS`: Time between polls (default: 5000)
//! - `UPSTREAM_TIMEOUT_MS`: Upstream request timeout (default: 4000)
//! - `BROKER_URL`: Broker URL (default: redis://127.0.0.1:6379)
//! - `PRICE_TOPIC`: Topic to publish to (default: price-updates)
//! - `TOPIC_MAX_LEN`: Approximate readings retained (default: 1000)
//! - `PRODUCER_HEALTH_PORT`: Health and metrics port (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_bus::{Broker, RedisStreamBroker, SharedBroker};
use price_producer::infrastructure::telemetry;
use price_producer::{
    HealthServer, HealthServerState, HttpPriceSource, PricePoller, ProducerConfig, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting price producer");

    let _metrics_handle = init_metrics();

    let config = ProducerConfig::from_env()?;
    log_config(&config);

    let broker: SharedBroker = Arc::new(RedisStreamBroker::new(
        &config.broker.url,
        config.broker.redis_settings(),
    )?);

    broker
        .ping()
        .await
        .context("broker unreachable at startup")?;
    tracing::info!("Broker connected");

    let source = Arc::new(HttpPriceSource::new(&config.upstream)?);
    let poller = Arc::new(PricePoller::new(
        source,
        broker,
        config.poller_settings(),
    ));

    let shutdown_token = CancellationToken::new();

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&poller),
    ));
    let health_server = HealthServer::new(config.health_port, health_state, shutdown_token.clone());
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let poller_task = tokio::spawn(Arc::clone(&poller).run(shutdown_token.clone()));

    tracing::info!("Price producer ready");

    await_shutdown(shutdown_token).await;

    let drained = async {
        if let Err(e) = poller_task.await {
            tracing::error!(error = %e, "Poller task failed");
        }
        let _ = health_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drained).await.is_err() {
        tracing::warn!("In-flight polls did not finish within the shutdown timeout");
    }

    let stats = poller.stats().snapshot();
    tracing::info!(
        published = stats.published,
        failures = stats.fetch_failures + stats.parse_failures + stats.publish_failures,
        "Price producer stopped"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ProducerConfig) {
    tracing::info!(
        symbol = %config.upstream.symbol,
        topic = %config.broker.topic,
        poll_interval_ms = u64::try_from(config.poll_interval.as_millis()).unwrap_or(u64::MAX),
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        upstream_url = %config.upstream.url,
        broker_url = %config.broker.url,
        "Endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    if let Some(env_path) = cwd
        .ancestors()
        .skip(1)
        .map(|dir| dir.join(".env"))
        .find(|path| path.exists())
    {
        let _ = dotenvy::from_path(&env_path);
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
