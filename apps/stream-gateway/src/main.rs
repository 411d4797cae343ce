//! Stream Gateway Binary
//!
//! Serves live prices over server-sent events and proxies history queries.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin stream-gateway
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `HISTORY_UPSTREAM_URL`: History service endpoint
//!
//! ## Optional
//! - `BROKER_URL`: Broker URL (default: redis://127.0.0.1:6379)
//! - `PRICE_TOPIC`: Topic carrying readings (default: price-updates)
//! - `CONSUMER_GROUP`: Shared consumer group (default: stock-group)
//! - `GATEWAY_HTTP_PORT`: HTTP port (default: 3000)
//! - `HISTORY_TIMEOUT_MS`: History request timeout (default: 10000)
//! - `CLIENT_BUFFER_CAPACITY`: Buffered events per client (default: 256)
//! - `SSE_KEEP_ALIVE_SECS`: Keep-alive comment interval, 0 disables (default: 15)
//! - `BROKER_BLOCK_MS`: Broker read block time (default: 1000)
//! - `BROKER_BATCH_SIZE`: Messages per broker read (default: 64)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use price_bus::{Broker, RedisStreamBroker, SharedBroker};
use stream_gateway::infrastructure::telemetry;
use stream_gateway::{
    AppState, GatewayConfig, GatewayServer, HealthState, HttpHistorySource, StreamHub,
    StreamHubConfig, init_metrics, router,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting stream gateway");

    let _metrics_handle = init_metrics();

    let config = GatewayConfig::from_env()?;
    log_config(&config);

    let broker: SharedBroker = Arc::new(RedisStreamBroker::new(
        &config.broker.url,
        config.broker.redis_settings(),
    )?);

    if let Err(e) = broker.ping().await {
        tracing::warn!(error = %e, "Broker not reachable yet; streams will fail until it is");
    }

    let hub = StreamHub::new(
        broker,
        StreamHubConfig {
            topic: config.broker.topic.clone(),
            group: config.broker.group.clone(),
            client_buffer: config.stream.client_buffer,
        },
    );

    let history = Arc::new(HttpHistorySource::new(&config.history)?);
    let health_state = Arc::new(HealthState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        hub.clone(),
    ));

    let app = router(
        AppState {
            hub: hub.clone(),
            history,
            keep_alive: config.stream.keep_alive,
        },
        health_state,
    );

    let shutdown_token = CancellationToken::new();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.http_port));
    let server = GatewayServer::bind(addr, app, shutdown_token.clone()).await?;

    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "Gateway HTTP server error");
        }
    });

    tracing::info!("Stream gateway ready");

    await_shutdown(shutdown_token).await;

    // Open SSE bodies only end once the hub drains them.
    hub.shutdown().await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, server_task).await.is_err() {
        tracing::warn!("HTTP server did not stop within the shutdown timeout");
    }

    tracing::info!("Stream gateway stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &GatewayConfig) {
    tracing::info!(
        topic = %config.broker.topic,
        group = %config.broker.group,
        http_port = config.server.http_port,
        client_buffer = config.stream.client_buffer,
        keep_alive_secs = config.stream.keep_alive.map_or(0, |d| d.as_secs()),
        "Configuration loaded"
    );
    tracing::debug!(
        broker_url = %config.broker.url,
        history_url = %config.history.upstream_url,
        "Upstream endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
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
