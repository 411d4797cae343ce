//! SSE Streaming Integration Tests
//!
//! Full path from a broker publish to an HTTP client reading `/stream`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::time::Duration;

use common::{SseClient, TestGateway, reading_json};
use price_bus::MemoryBroker;

#[tokio::test]
async fn clients_see_only_readings_published_after_they_connect() {
    let gateway = TestGateway::start(MemoryBroker::new()).await;

    let mut early = SseClient::connect(&gateway).await;
    gateway.publish(101.5, 1000).await;
    assert_eq!(early.expect_event().await, reading_json(101.5, 1000));

    let mut late = SseClient::connect(&gateway).await;
    gateway.publish(102.0, 2000).await;

    assert_eq!(early.expect_event().await, reading_json(102.0, 2000));
    assert_eq!(late.expect_event().await, reading_json(102.0, 2000));

    early.expect_silence(Duration::from_millis(200)).await;
    late.expect_silence(Duration::from_millis(50)).await;

    gateway.stop().await;
}

#[tokio::test]
async fn keep_alive_comments_interleave_with_readings() {
    let gateway =
        TestGateway::start_with_keep_alive(MemoryBroker::new(), Duration::from_millis(50)).await;

    let mut client = SseClient::connect(&gateway).await;
    let idle = client.raw_for(Duration::from_millis(200)).await;
    assert!(idle.contains(":\n\n"), "no keep-alive comment in {idle:?}");

    gateway.publish(7.5, 7).await;
    assert_eq!(client.expect_event().await, reading_json(7.5, 7));

    gateway.stop().await;
}

#[tokio::test]
async fn backlog_is_not_replayed_to_new_clients() {
    let gateway = TestGateway::start(MemoryBroker::new()).await;
    for i in 0..3 {
        gateway.publish(50.0 + f64::from(i), i64::from(i)).await;
    }

    let mut client = SseClient::connect(&gateway).await;
    gateway.publish(99.0, 99).await;

    assert_eq!(client.expect_event().await, reading_json(99.0, 99));
    client.expect_silence(Duration::from_millis(100)).await;

    gateway.stop().await;
}

#[tokio::test]
async fn events_arrive_in_order_without_duplicates() {
    let gateway = TestGateway::start(MemoryBroker::new()).await;
    let mut client = SseClient::connect(&gateway).await;

    for ts in 1..=50 {
        gateway.publish(100.0, ts).await;
    }

    for ts in 1..=50 {
        assert_eq!(client.expect_event().await, reading_json(100.0, ts));
    }
    client.expect_silence(Duration::from_millis(100)).await;

    gateway.stop().await;
}

#[tokio::test]
async fn stream_response_has_event_stream_headers() {
    let gateway = TestGateway::start(MemoryBroker::new()).await;

    let response = reqwest::get(gateway.url("/stream")).await.unwrap();
    let headers = response.headers().clone();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");

    let mut client = SseClient::from_response(response);
    gateway.publish(1.25, 5).await;
    assert_eq!(
        client.expect_event().await,
        r#"{"symbol":"X","price":1.25,"timestamp":5}"#
    );

    drop(client);
    gateway.stop().await;
}

#[tokio::test]
async fn subscribe_failure_aborts_the_stream() {
    let broker = MemoryBroker::new();
    broker.set_available(false);
    let gateway = TestGateway::start(broker.clone()).await;

    let aborted = match reqwest::get(gateway.url("/stream")).await {
        Err(_) => true,
        Ok(response) => tokio::time::timeout(common::EVENT_TIMEOUT, response.bytes())
            .await
            .expect("aborted body does not hang")
            .is_err(),
    };
    assert!(aborted);
    assert_eq!(gateway.hub.client_count(), 0);

    // The gateway stays up and recovers once the broker is back.
    broker.set_available(true);
    let mut client = SseClient::connect(&gateway).await;
    gateway.publish(7.0, 7).await;
    assert_eq!(client.expect_event().await, reading_json(7.0, 7));

    drop(client);
    gateway.stop().await;
}
