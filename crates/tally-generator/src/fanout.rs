//! Concurrent publishing of a planned batch.
//!
//! Every event is published by its own task and the batch waits for all of
//! them. A failed publish does not cancel its siblings, so events that were
//! delivered stay visible to consumers even when the batch as a whole is
//! reported as failed.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tally_core::clock::Clock;
use tally_core::error::PipelineError;
use tally_core::event::TrackingEvent;
use tally_core::rng::DeterministicRng;
use tally_core::transport::{Delivery, EventPublisher};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::batch::BatchSpec;

/// Result of publishing one event of a batch.
#[derive(Debug)]
pub struct PublishOutcome {
    /// The event that was published.
    pub event: TrackingEvent,
    /// The transport's acknowledgment, or why the publish failed.
    pub result: Result<Delivery, PipelineError>,
}

/// Outcome of every publish in a batch, in planning order.
#[derive(Debug, Default)]
pub struct BatchReport {
    outcomes: Vec<PublishOutcome>,
}

/// Counts describing a finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Events planned.
    pub total: usize,
    /// Events the transport acknowledged.
    pub published: usize,
    /// Events whose publish failed.
    pub failed: usize,
}

impl BatchReport {
    /// Every per-event outcome, in planning order.
    #[must_use]
    pub fn outcomes(&self) -> &[PublishOutcome] {
        &self.outcomes
    }

    /// Number of events the transport acknowledged.
    #[must_use]
    pub fn published(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Number of events whose publish failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.published()
    }

    /// Counts for reporting.
    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.outcomes.len(),
            published: self.published(),
            failed: self.failed(),
        }
    }

    /// The first failure in planning order, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&PipelineError> {
        self.outcomes.iter().find_map(|o| o.result.as_ref().err())
    }

    /// Collapses the report into the batch-level verdict: success only if
    /// every publish succeeded.
    ///
    /// # Errors
    ///
    /// Returns the first failure in planning order. Events published before
    /// or alongside it are not retracted.
    pub fn into_result(self) -> Result<BatchSummary, PipelineError> {
        let summary = self.summary();
        match self.outcomes.into_iter().find_map(|o| o.result.err()) {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}

/// Publishes generated batches to the transport.
pub struct EventGenerator {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    clock: Arc<dyn Clock>,
    rng: Arc<Mutex<dyn DeterministicRng + Send>>,
    max_in_flight: Option<usize>,
}

impl EventGenerator {
    /// Creates a generator publishing to `topic`.
    #[must_use]
    pub fn new(
        publisher: Arc<dyn EventPublisher>,
        topic: impl Into<String>,
        clock: Arc<dyn Clock>,
        rng: Arc<Mutex<dyn DeterministicRng + Send>>,
    ) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            clock,
            rng,
            max_in_flight: None,
        }
    }

    /// Caps the number of publishes in flight at once. Without a cap every
    /// event of the batch is in flight together.
    #[must_use]
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = Some(limit.max(1));
        self
    }

    /// Topic every event is published to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Plans `spec` and publishes every resulting event.
    ///
    /// The RNG mutex is held only while planning, never across an await.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Validation` if the batch is invalid, or
    /// `PipelineError::Internal` if the RNG lock is poisoned. Publish
    /// failures are reported in the returned `BatchReport`, not here.
    #[instrument(skip(self, spec), fields(topic = %self.topic, bucket_days = spec.bucket_days()))]
    pub async fn generate(&self, spec: &BatchSpec) -> Result<BatchReport, PipelineError> {
        let events = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|e| PipelineError::Internal(format!("RNG mutex poisoned: {e}")))?;
            spec.plan(self.clock.as_ref(), &mut *rng)?
        };
        Ok(self.publish_all(events).await)
    }

    /// Publishes `events` concurrently and waits for every task.
    pub async fn publish_all(&self, events: Vec<TrackingEvent>) -> BatchReport {
        let permits = self.max_in_flight.map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks = JoinSet::new();

        for (index, event) in events.iter().cloned().enumerate() {
            let publisher = Arc::clone(&self.publisher);
            let topic = self.topic.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = match permits {
                    Some(sem) => match sem.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => return (index, Err(PipelineError::Transport(e.to_string()))),
                    },
                    None => None,
                };
                let result = match event.encode() {
                    Ok(payload) => {
                        publisher
                            .publish(&topic, &event.partition_key(), payload)
                            .await
                    }
                    Err(e) => Err(e),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<Delivery, PipelineError>>> =
            events.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!(error = %e, "publish task did not complete"),
            }
        }

        let outcomes: Vec<PublishOutcome> = events
            .into_iter()
            .zip(results)
            .map(|(event, result)| PublishOutcome {
                result: result.unwrap_or_else(|| {
                    Err(PipelineError::Transport("publish task did not complete".into()))
                }),
                event,
            })
            .collect();

        for failure in outcomes.iter().filter(|o| o.result.is_err()) {
            if let Err(e) = &failure.result {
                warn!(event_id = %failure.event.event.event_id, error = %e, "publish failed");
            }
        }

        let report = BatchReport { outcomes };
        let summary = report.summary();
        info!(
            total = summary.total,
            published = summary.published,
            failed = summary.failed,
            "batch published"
        );
        report
    }
}
