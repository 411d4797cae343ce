//! Shared harness: a gateway on an ephemeral port backed by the in-memory
//! broker, plus a minimal SSE client.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use price_bus::{MemoryBroker, PriceReading, publish_reading};
use stream_gateway::{
    AppState, GatewayServer, HealthState, HistorySettings, HttpHistorySource, StreamHub,
    StreamHubConfig, router,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const TOPIC: &str = "price-updates";

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

pub struct TestGateway {
    pub addr: SocketAddr,
    pub hub: StreamHub,
    pub broker: MemoryBroker,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestGateway {
    pub async fn start(broker: MemoryBroker) -> Self {
        // Nothing listens on port 9; history calls fail unless a test
        // overrides the upstream.
        Self::start_with_history(broker, "http://127.0.0.1:9/history".to_string()).await
    }

    pub async fn start_with_history(broker: MemoryBroker, history_url: String) -> Self {
        Self::start_with(broker, history_url, None).await
    }

    pub async fn start_with_keep_alive(broker: MemoryBroker, interval: Duration) -> Self {
        Self::start_with(broker, "http://127.0.0.1:9/history".to_string(), Some(interval)).await
    }

    async fn start_with(
        broker: MemoryBroker,
        history_url: String,
        keep_alive: Option<Duration>,
    ) -> Self {
        let hub = StreamHub::new(Arc::new(broker.clone()), StreamHubConfig::default());
        let history = HttpHistorySource::new(&HistorySettings {
            upstream_url: history_url,
            timeout: Duration::from_secs(2),
        })
        .unwrap();

        let app = router(
            AppState {
                hub: hub.clone(),
                history: Arc::new(history),
                keep_alive,
            },
            Arc::new(HealthState::new("test".to_string(), hub.clone())),
        );

        let cancel = CancellationToken::new();
        let server = GatewayServer::bind("127.0.0.1:0".parse().unwrap(), app, cancel.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            server.run().await.unwrap();
        });

        Self {
            addr,
            hub,
            broker,
            cancel,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn publish(&self, price: f64, timestamp: i64) {
        publish_reading(&self.broker, TOPIC, &PriceReading::new("X", price, timestamp))
            .await
            .unwrap();
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        self.hub.shutdown().await;
        tokio::time::timeout(EVENT_TIMEOUT, self.handle)
            .await
            .expect("server stops after shutdown")
            .unwrap();
    }
}

pub struct SseClient {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: String,
}

impl SseClient {
    pub async fn connect(gateway: &TestGateway) -> Self {
        let response = reqwest::get(gateway.url("/stream")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        Self::from_response(response)
    }

    pub fn from_response(response: reqwest::Response) -> Self {
        Self {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|b| b.to_vec()))
                .boxed(),
            buffer: String::new(),
        }
    }

    /// Raw body text received within `window`.
    pub async fn raw_for(&mut self, window: Duration) -> String {
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(Ok(chunk))) = tokio::time::timeout_at(deadline, self.body.next()).await {
            self.buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        }
        self.buffer.clone()
    }

    /// Next `data:` payload, or `None` once the body ends or fails.
    pub async fn next_event(&mut self) -> Option<Result<String, reqwest::Error>> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame: String = self.buffer.drain(..end + 2).collect();
                if let Some(data) = frame.lines().find_map(|l| l.strip_prefix("data: ")) {
                    return Some(Ok(data.to_string()));
                }
                continue;
            }

            match self.body.next().await? {
                Ok(chunk) => self.buffer.push_str(std::str::from_utf8(&chunk).unwrap()),
                Err(e) => return Some(Err(e)),
            }
        }
    }

    pub async fn expect_event(&mut self) -> String {
        tokio::time::timeout(EVENT_TIMEOUT, self.next_event())
            .await
            .expect("event within timeout")
            .expect("stream still open")
            .expect("body intact")
    }

    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(event) = tokio::time::timeout(window, self.next_event()).await {
            panic!("expected no event, got {event:?}");
        }
    }
}

pub fn reading_json(price: f64, timestamp: i64) -> String {
    PriceReading::new("X", price, timestamp).to_json().unwrap()
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
