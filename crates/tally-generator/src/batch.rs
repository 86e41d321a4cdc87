//! Batch specifications and event planning.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tally_core::clock::Clock;
use tally_core::error::PipelineError;
use tally_core::event::{
    BUCKET_SECONDS, EVENT_COUNT, EventInfo, STATUS_FAILURE, STATUS_SUCCESS, TrackingEvent,
    bucket_start,
};
use tally_core::rng::DeterministicRng;

/// Upper bound on consecutive buckets per batch.
pub const MAX_BUCKET_DAYS: u32 = 31;

/// Upper bound on events published by one batch.
pub const MAX_BATCH_EVENTS: u64 = 10_000;

fn one() -> u32 {
    1
}

/// What a generation batch produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BatchSpec {
    /// A fixed store/client/event type with an exact event count per bucket.
    Fixed {
        /// Store identifier.
        store_id: String,
        /// Client identifier.
        client_id: String,
        /// Event type.
        event_type: String,
        /// Events per bucket.
        events: u32,
        /// Number of consecutive daily buckets.
        #[serde(default = "one")]
        bucket_days: u32,
        /// Epoch seconds inside the first bucket; defaults to now.
        #[serde(default)]
        base_bucket: Option<i64>,
    },
    /// Store, client, event type and event count drawn uniformly at random
    /// once per batch from `store1..=storeN` and so on.
    Ranged {
        /// Number of candidate stores.
        n_stores: u32,
        /// Number of candidate clients.
        n_clients: u32,
        /// Number of candidate event types.
        n_event_types: u32,
        /// Upper bound of the drawn event count per bucket.
        max_events: u32,
        /// Number of consecutive daily buckets.
        #[serde(default = "one")]
        bucket_days: u32,
        /// Epoch seconds inside the first bucket; defaults to now.
        #[serde(default)]
        base_bucket: Option<i64>,
    },
}

impl BatchSpec {
    /// Consecutive daily buckets covered by the batch.
    #[must_use]
    pub fn bucket_days(&self) -> u32 {
        match self {
            Self::Fixed { bucket_days, .. } | Self::Ranged { bucket_days, .. } => *bucket_days,
        }
    }

    fn base_bucket(&self) -> Option<i64> {
        match self {
            Self::Fixed { base_bucket, .. } | Self::Ranged { base_bucket, .. } => *base_bucket,
        }
    }

    /// Checks the batch is non-empty and bounded.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` describing the first violation.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let per_bucket = match self {
            Self::Fixed {
                store_id,
                client_id,
                event_type,
                events,
                ..
            } => {
                for (field, value) in [
                    ("store_id", store_id),
                    ("client_id", client_id),
                    ("event_type", event_type),
                ] {
                    if value.trim().is_empty() {
                        return Err(PipelineError::Validation(format!(
                            "{field} must not be empty"
                        )));
                    }
                }
                positive("events", *events)?
            }
            Self::Ranged {
                n_stores,
                n_clients,
                n_event_types,
                max_events,
                ..
            } => {
                positive("n_stores", *n_stores)?;
                positive("n_clients", *n_clients)?;
                positive("n_event_types", *n_event_types)?;
                positive("max_events", *max_events)?
            }
        };

        let days = self.bucket_days();
        if days == 0 || days > MAX_BUCKET_DAYS {
            return Err(PipelineError::Validation(format!(
                "bucket_days must be between 1 and {MAX_BUCKET_DAYS}, got {days}"
            )));
        }
        let total = u64::from(per_bucket) * u64::from(days);
        if total > MAX_BATCH_EVENTS {
            return Err(PipelineError::Validation(format!(
                "batch would publish up to {total} events, limit is {MAX_BATCH_EVENTS}"
            )));
        }
        Ok(())
    }

    /// Expands the batch into the concrete events to publish. Ids restart at
    /// `evt1` in every bucket; statuses are provisional coin flips.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` if the batch is invalid.
    pub fn plan(
        &self,
        clock: &dyn Clock,
        rng: &mut dyn DeterministicRng,
    ) -> Result<Vec<TrackingEvent>, PipelineError> {
        self.validate()?;

        let now = clock.now();
        let (store_id, client_id, event_type, events) = match self {
            Self::Fixed {
                store_id,
                client_id,
                event_type,
                events,
                ..
            } => (
                store_id.clone(),
                client_id.clone(),
                event_type.clone(),
                *events,
            ),
            Self::Ranged {
                n_stores,
                n_clients,
                n_event_types,
                max_events,
                ..
            } => (
                format!("store{}", rng.next_u32_range(1, *n_stores)),
                format!("client{}", rng.next_u32_range(1, *n_clients)),
                format!("event_type{}", rng.next_u32_range(1, *n_event_types)),
                rng.next_u32_range(1, *max_events),
            ),
        };

        let first_bucket = match self.base_bucket() {
            Some(secs) => DateTime::from_timestamp(secs, 0).map(bucket_start).ok_or_else(|| {
                PipelineError::Validation(format!("base_bucket {secs} is out of range"))
            })?,
            None => clock.current_bucket(),
        };

        let mut planned = Vec::new();
        for day in 0..self.bucket_days() {
            let bucket_date = first_bucket + i64::from(day) * BUCKET_SECONDS;
            for seq in 1..=events {
                let status = if rng.next_u32_range(0, 1) == 0 {
                    STATUS_SUCCESS
                } else {
                    STATUS_FAILURE
                };
                planned.push(TrackingEvent {
                    store_id: store_id.clone(),
                    client_id: client_id.clone(),
                    bucket_date,
                    event_type: event_type.clone(),
                    count: EVENT_COUNT,
                    event: EventInfo {
                        event_id: format!("evt{seq}"),
                        timestamp: now.timestamp(),
                        status: status.to_owned(),
                    },
                });
            }
        }
        Ok(planned)
    }
}

fn positive(field: &str, value: u32) -> Result<u32, PipelineError> {
    if value == 0 {
        return Err(PipelineError::Validation(format!("{field} must be at least 1")));
    }
    Ok(value)
}
