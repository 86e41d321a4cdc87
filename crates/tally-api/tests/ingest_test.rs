//! Integration tests for the ingestion trigger.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;
use tally_test_support::{InMemoryBroker, RejectingPublisher};

#[tokio::test]
async fn test_empty_body_publishes_default_batch() {
    let broker = InMemoryBroker::new();
    let app = common::build_test_app(Arc::new(broker.clone()));

    let (status, json) = common::post_raw(app, "/receive-event", Vec::new()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "total": 3, "published": 3, "failed": 0 }));

    let events = broker.published_events(common::TOPIC);
    assert_eq!(events.len(), 3);
    let midnight = common::fixed_clock().0.timestamp() - 12 * 3_600;
    for event in &events {
        assert_eq!(event.store_id, "store1");
        assert_eq!(event.client_id, "client1");
        assert_eq!(event.bucket_date, midnight);
        assert_eq!(event.count, 1);
    }
}

#[tokio::test]
async fn test_explicit_spec_is_honoured() {
    let broker = InMemoryBroker::new();
    let app = common::build_test_app(Arc::new(broker.clone()));

    let (status, json) = common::post_json(
        app,
        "/receive-event",
        &json!({
            "mode": "fixed",
            "store_id": "store7",
            "client_id": "client2",
            "event_type": "event_type4",
            "events": 4,
            "bucket_days": 5,
            "base_bucket": 1_727_740_800
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["published"], 20);

    let events = broker.published_events(common::TOPIC);
    assert!(events.iter().all(|e| e.store_id == "store7"));
    let mut buckets: Vec<i64> = events.iter().map(|e| e.bucket_date).collect();
    buckets.sort_unstable();
    buckets.dedup();
    assert_eq!(buckets.len(), 5);
    assert_eq!(buckets[0], 1_727_740_800);
}

#[tokio::test]
async fn test_partial_failure_returns_500_with_counts() {
    let broker = InMemoryBroker::new();
    let publisher = RejectingPublisher::new(broker.clone(), &["evt2"]);
    let app = common::build_test_app(Arc::new(publisher));

    let (status, json) = common::post_raw(app, "/receive-event", Vec::new()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "publish_failed");
    assert_eq!(json["published"], 2);
    assert_eq!(json["failed"], 1);
    assert!(json["message"].as_str().unwrap().contains("evt2"));
    // Already-published siblings stay on the transport.
    assert_eq!(broker.published_events(common::TOPIC).len(), 2);
}

#[tokio::test]
async fn test_invalid_spec_returns_400_and_publishes_nothing() {
    let broker = InMemoryBroker::new();
    let app = common::build_test_app(Arc::new(broker.clone()));

    let (status, json) = common::post_json(
        app,
        "/receive-event",
        &json!({
            "mode": "ranged",
            "n_stores": 0,
            "n_clients": 1,
            "n_event_types": 1,
            "max_events": 5
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
    assert!(broker.payloads(common::TOPIC).is_empty());
}

#[tokio::test]
async fn test_malformed_body_returns_400() {
    let app = common::build_test_app(Arc::new(InMemoryBroker::new()));

    let (status, json) =
        common::post_raw(app, "/receive-event", b"{\"mode\": \"sideways\"}".to_vec()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["message"].as_str().unwrap().contains("invalid batch spec"));
}
