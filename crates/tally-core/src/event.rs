//! Tracking event wire model.
//!
//! A [`TrackingEvent`] is published once per user action and never mutated
//! afterwards. The forwarder turns it into a [`ResolvedEvent`] once the
//! status oracle has supplied the authoritative status; that resolved form
//! only ever exists as an input to the aggregation store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregation::AggregationKey;
use crate::error::PipelineError;

/// Status string that routes an event into the success list.
pub const STATUS_SUCCESS: &str = "success";

/// Status string used for failed deliveries.
pub const STATUS_FAILURE: &str = "failure";

/// Count every tracking event must declare. Keeping it fixed makes the
/// document count equal to the number of list entries.
pub const EVENT_COUNT: i64 = 1;

/// Width of one aggregation bucket, in seconds (one UTC day).
pub const BUCKET_SECONDS: i64 = 86_400;

/// Returns the epoch-seconds start of the bucket containing `at`.
#[must_use]
pub fn bucket_start(at: DateTime<Utc>) -> i64 {
    let secs = at.timestamp();
    secs - secs.rem_euclid(BUCKET_SECONDS)
}

/// Identity, timing and provisional status of a single interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Event identifier, unique within its batch.
    pub event_id: String,
    /// Epoch seconds at which the event was produced.
    pub timestamp: i64,
    /// Provisional status; overwritten by the status oracle.
    pub status: String,
}

/// The message carried on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// Store the interaction happened at.
    pub store_id: String,
    /// Client that performed the interaction.
    pub client_id: String,
    /// Epoch-seconds start of the reporting bucket.
    pub bucket_date: i64,
    /// Kind of interaction.
    pub event_type: String,
    /// Declared event count; always [`EVENT_COUNT`] for accepted events.
    pub count: i64,
    /// Per-event identity and status.
    pub event: EventInfo,
}

impl TrackingEvent {
    /// Decodes and validates a transport payload.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Decode` if the payload is not a JSON tracking
    /// event, or `PipelineError::Validation` if it violates a domain rule.
    pub fn decode(payload: &[u8]) -> Result<Self, PipelineError> {
        let event: Self = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::Decode(format!("invalid tracking event payload: {e}")))?;
        event.validate()?;
        Ok(event)
    }

    /// Serializes the event for publishing.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Decode` if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, PipelineError> {
        serde_json::to_vec(self)
            .map_err(|e| PipelineError::Decode(format!("tracking event serialization failed: {e}")))
    }

    /// Checks the domain rules every accepted event satisfies.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` on an empty identifier or a
    /// declared count other than [`EVENT_COUNT`].
    pub fn validate(&self) -> Result<(), PipelineError> {
        let identifiers = [
            ("store_id", &self.store_id),
            ("client_id", &self.client_id),
            ("event_type", &self.event_type),
            ("event.event_id", &self.event.event_id),
        ];
        for (field, value) in identifiers {
            if value.trim().is_empty() {
                return Err(PipelineError::Validation(format!("{field} must not be empty")));
            }
        }
        if self.count != EVENT_COUNT {
            return Err(PipelineError::Validation(format!(
                "count must be {EVENT_COUNT}, got {}",
                self.count
            )));
        }
        Ok(())
    }

    /// Returns the aggregation key this event contributes to.
    #[must_use]
    pub fn key(&self) -> AggregationKey {
        AggregationKey {
            store_id: self.store_id.clone(),
            client_id: self.client_id.clone(),
            bucket_date: self.bucket_date,
        }
    }

    /// Returns the partition key used on the transport. All events of one
    /// store/client pair share a partition and therefore an order.
    #[must_use]
    pub fn partition_key(&self) -> String {
        format!("{}:{}", self.store_id, self.client_id)
    }

    /// Overwrites the provisional status with the oracle's answer.
    #[must_use]
    pub fn resolve(mut self, status: impl Into<String>) -> ResolvedEvent {
        self.event.status = status.into();
        ResolvedEvent(self)
    }
}

/// Identity and timing entry stored in an aggregation document's lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetail {
    /// Event identifier.
    pub event_id: String,
    /// Epoch seconds at which the event was produced.
    pub timestamp: i64,
    /// Kind of interaction.
    pub event_type: String,
}

/// Which list of the aggregation document an event lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Appended to `list_success`.
    Success,
    /// Appended to `list_failure`.
    Failure,
}

impl Outcome {
    /// Maps a resolved status to an outcome. Only the exact string
    /// `"success"` counts as success; every other status is a failure.
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        if status == STATUS_SUCCESS {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// A tracking event whose status was set by the status oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent(TrackingEvent);

impl ResolvedEvent {
    /// The underlying event, carrying the resolved status.
    #[must_use]
    pub fn tracking(&self) -> &TrackingEvent {
        &self.0
    }

    /// The resolved status string.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.0.event.status
    }

    /// The list this event is appended to.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        Outcome::from_status(self.status())
    }

    /// The document key.
    #[must_use]
    pub fn key(&self) -> AggregationKey {
        self.0.key()
    }

    /// The declared count increment.
    #[must_use]
    pub fn count(&self) -> i64 {
        self.0.count
    }

    /// The list entry recorded for this event.
    #[must_use]
    pub fn detail(&self) -> EventDetail {
        EventDetail {
            event_id: self.0.event.event_id.clone(),
            timestamp: self.0.event.timestamp,
            event_type: self.0.event_type.clone(),
        }
    }
}
