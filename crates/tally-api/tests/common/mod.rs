//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tally_core::clock::Clock;
use tally_core::rng::DeterministicRng;
use tally_core::transport::EventPublisher;
use tally_generator::{BatchSpec, EventGenerator};
use tally_test_support::{FixedClock, SequenceRng};
use tower::ServiceExt;

use tally_api::routes;
use tally_api::state::AppState;

pub const TOPIC: &str = "tracking-events";

/// Midday on 2024-10-01, UTC.
pub fn fixed_clock() -> FixedClock {
    FixedClock::at(2024, 10, 1, 12, 0, 0)
}

/// The batch published for an empty request body.
pub fn default_batch() -> BatchSpec {
    BatchSpec::Fixed {
        store_id: "store1".to_owned(),
        client_id: "client1".to_owned(),
        event_type: "event_type1".to_owned(),
        events: 3,
        bucket_days: 1,
        base_bucket: None,
    }
}

/// Build the full app router publishing to `publisher`, with a fixed clock
/// and every provisional status drawn as "success". Uses the same route
/// structure as `main.rs`.
pub fn build_test_app(publisher: Arc<dyn EventPublisher>) -> Router {
    let clock: Arc<dyn Clock> = Arc::new(fixed_clock());
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> =
        Arc::new(Mutex::new(SequenceRng::new(vec![0])));
    let generator = EventGenerator::new(publisher, TOPIC, clock, rng);
    let app_state = AppState::new(Arc::new(generator), default_batch());

    Router::new()
        .merge(routes::health::router())
        .merge(routes::ingest::router())
        .merge(routes::oracle::router())
        .with_state(app_state)
}

/// Send a POST request with a raw body and return the response.
pub async fn post_raw(app: Router, uri: &str, body: Vec<u8>) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    post_raw(app, uri, serde_json::to_vec(body).unwrap()).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}
