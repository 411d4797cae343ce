//! History Proxy and Health Integration Tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::TestGateway;
use price_bus::MemoryBroker;
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MISSING: &str = r#"{"error":"Missing \"from\" or \"to\" query paramaters."}"#;
const INVALID: &str = r#"{"error":"Invalid \"from\" or \"to\" query parameters."}"#;
const UPSTREAM: &str = r#"{"error":"Failed to fetch historical data"}"#;

async fn gateway_with_upstream(server: &MockServer) -> TestGateway {
    TestGateway::start_with_history(MemoryBroker::new(), format!("{}/history", server.uri())).await
}

async fn get(gateway: &TestGateway, path_and_query: &str) -> (u16, String) {
    let response = reqwest::get(gateway.url(path_and_query)).await.unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}

#[tokio::test]
async fn missing_bounds_are_rejected() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&upstream)
        .await;
    let gateway = gateway_with_upstream(&upstream).await;

    for query in ["/history", "/history?from=1", "/history?to=2", "/history?from=&to=2"] {
        assert_eq!(get(&gateway, query).await, (400, MISSING.to_string()), "{query}");
    }

    gateway.stop().await;
}

#[tokio::test]
async fn non_numeric_bounds_are_rejected() {
    let upstream = MockServer::start().await;
    let gateway = gateway_with_upstream(&upstream).await;

    assert_eq!(
        get(&gateway, "/history?from=yesterday&to=2").await,
        (400, INVALID.to_string())
    );

    gateway.stop().await;
}

#[tokio::test]
async fn readings_are_passed_through() {
    let upstream = MockServer::start().await;
    let body = json!([
        {"symbol": "X", "price": 101.5, "timestamp": 1000},
        {"symbol": "X", "price": 102.0, "timestamp": 2000}
    ]);
    Mock::given(method("GET"))
        .and(path("/history"))
        .and(query_param("from", "1000"))
        .and(query_param("to", "2000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
        .expect(1)
        .mount(&upstream)
        .await;
    let gateway = gateway_with_upstream(&upstream).await;

    let response = reqwest::get(gateway.url("/history?from=1000&to=2000"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), body);

    gateway.stop().await;
}

#[tokio::test]
async fn upstream_error_status_maps_to_500() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&upstream)
        .await;
    let gateway = gateway_with_upstream(&upstream).await;

    assert_eq!(
        get(&gateway, "/history?from=1&to=2").await,
        (500, UPSTREAM.to_string())
    );

    gateway.stop().await;
}

#[tokio::test]
async fn undecodable_upstream_body_maps_to_500() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"not": "a list"})))
        .mount(&upstream)
        .await;
    let gateway = gateway_with_upstream(&upstream).await;

    assert_eq!(
        get(&gateway, "/history?from=1&to=2").await,
        (500, UPSTREAM.to_string())
    );

    gateway.stop().await;
}

#[tokio::test]
async fn unreachable_upstream_maps_to_500() {
    let gateway = TestGateway::start(MemoryBroker::new()).await;

    assert_eq!(
        get(&gateway, "/history?from=1&to=2").await,
        (500, UPSTREAM.to_string())
    );

    gateway.stop().await;
}

#[tokio::test]
async fn health_endpoints_report_feed_state() {
    let broker = MemoryBroker::new();
    let gateway = TestGateway::start(broker.clone()).await;

    assert_eq!(get(&gateway, "/healthz").await, (200, "OK".to_string()));
    assert_eq!(get(&gateway, "/readyz").await, (200, "READY".to_string()));

    let health: Value = reqwest::get(gateway.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["feed"]["state"], "idle");
    assert_eq!(health["feed"]["clients"], 0);

    // A failed subscribe with the broker still down is not ready.
    broker.set_available(false);
    let _ = reqwest::get(gateway.url("/stream")).await;
    common::wait_until(|| gateway.hub.snapshot().state == stream_gateway::FeedState::Failed).await;
    assert_eq!(get(&gateway, "/readyz").await.0, 503);
    assert_eq!(get(&gateway, "/health").await.0, 503);

    // Broker back but no client has re-established the feed yet.
    broker.set_available(true);
    assert_eq!(get(&gateway, "/readyz").await, (200, "READY".to_string()));
    let response = reqwest::get(gateway.url("/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let health: Value = response.json().await.unwrap();
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["feed"]["state"], "failed");

    gateway.stop().await;
}
