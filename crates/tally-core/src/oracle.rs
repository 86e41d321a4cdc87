//! Status oracle abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::event::TrackingEvent;

/// Request and response body of a status resolution. The oracle echoes the
/// request with `status` replaced by its authoritative answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStatus {
    /// Event identifier.
    pub event_id: String,
    /// Client identifier.
    pub client_id: String,
    /// Store identifier.
    pub store_id: String,
    /// Epoch-seconds start of the bucket.
    pub bucket_date: i64,
    /// Kind of interaction.
    pub event_type: String,
    /// Provisional status in the request, resolved status in the response.
    pub status: String,
    /// Epoch seconds at which the event was produced.
    pub timestamp: i64,
}

impl From<&TrackingEvent> for EventStatus {
    fn from(event: &TrackingEvent) -> Self {
        Self {
            event_id: event.event.event_id.clone(),
            client_id: event.client_id.clone(),
            store_id: event.store_id.clone(),
            bucket_date: event.bucket_date,
            event_type: event.event_type.clone(),
            status: event.event.status.clone(),
            timestamp: event.event.timestamp,
        }
    }
}

/// The downstream authority on an event's delivery status.
#[async_trait]
pub trait StatusOracle: Send + Sync {
    /// Resolves the canonical status of one event.
    async fn resolve(&self, query: &EventStatus) -> Result<EventStatus, PipelineError>;
}
