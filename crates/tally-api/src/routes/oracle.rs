//! Stub status oracle for local runs and tests.

use axum::extract::State;
use axum::{Json, Router, routing::post};
use tally_core::event::{STATUS_FAILURE, STATUS_SUCCESS};
use tally_core::oracle::EventStatus;
use tracing::{debug, instrument};

use crate::state::AppState;

/// POST /update-event
///
/// Answers `"success"` for events whose provisional status is `"success"`
/// and `"failure"` for everything else.
#[instrument(skip(state, query), fields(event_id = %query.event_id))]
async fn update_event(
    State(state): State<AppState>,
    Json(mut query): Json<EventStatus>,
) -> Json<EventStatus> {
    if !state.oracle_stub_delay.is_zero() {
        tokio::time::sleep(state.oracle_stub_delay).await;
    }
    let resolved = if query.status == STATUS_SUCCESS {
        STATUS_SUCCESS
    } else {
        STATUS_FAILURE
    };
    debug!(provisional = %query.status, resolved, "status resolved");
    resolved.clone_into(&mut query.status);
    Json(query)
}

/// Returns the stub oracle router.
pub fn router() -> Router<AppState> {
    Router::new().route("/update-event", post(update_event))
}
