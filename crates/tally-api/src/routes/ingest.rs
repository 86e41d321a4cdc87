//! Ingestion trigger: generates a batch and publishes it.

use axum::body::Bytes;
use axum::extract::State;
use axum::{Json, Router, routing::post};
use tally_core::error::PipelineError;
use tally_generator::{BatchSpec, BatchSummary};
use tracing::{info, instrument};

use crate::error::ApiError;
use crate::state::AppState;

/// POST /receive-event
///
/// The body is an optional JSON `BatchSpec`; an empty body publishes the
/// configured default batch. Every publish is awaited before responding.
#[instrument(skip(state, body), fields(body_bytes = body.len()))]
async fn receive_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<BatchSummary>, ApiError> {
    let spec = if body.iter().all(u8::is_ascii_whitespace) {
        state.default_batch.clone()
    } else {
        serde_json::from_slice::<BatchSpec>(&body)
            .map_err(|e| PipelineError::Validation(format!("invalid batch spec: {e}")))?
    };

    let report = state.generator.generate(&spec).await?;
    let summary = report.summary();
    if let Some(first) = report.into_result().err() {
        return Err(ApiError::PublishFailed { first, summary });
    }

    info!(published = summary.published, "batch accepted");
    Ok(Json(summary))
}

/// Returns the ingestion router.
pub fn router() -> Router<AppState> {
    Router::new().route("/receive-event", post(receive_event))
}
