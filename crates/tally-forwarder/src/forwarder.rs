//! The forwarder poll loop.

use std::sync::Arc;
use std::time::Duration;

use tally_core::aggregation::{AggregationStore, UpsertOutcome};
use tally_core::error::PipelineError;
use tally_core::event::TrackingEvent;
use tally_core::oracle::{EventStatus, StatusOracle};
use tally_core::transport::{EventPublisher, ReceivedMessage, Subscription};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Default wait for a message before polling again.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Lifecycle of a forwarder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwarderState {
    /// Between polls.
    Idle,
    /// Waiting on the transport.
    Polling,
    /// Handling one message.
    Processing,
    /// Cancelled; terminal.
    ShuttingDown,
}

/// What happened to one polled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The event reached the aggregation store.
    Aggregated(UpsertOutcome),
    /// The payload was not a valid tracking event.
    Discarded,
    /// The status oracle failed; the event was dropped.
    OracleFailed,
    /// The aggregation store failed; the event was dropped.
    StoreFailed,
}

/// Counters accumulated over a forwarder's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    /// Messages polled from the transport.
    pub received: u64,
    /// Events upserted into the aggregation store.
    pub aggregated: u64,
    /// Messages discarded as undecodable or invalid.
    pub discarded: u64,
    /// Events dropped because the status oracle failed.
    pub oracle_failures: u64,
    /// Events dropped because the aggregation store failed.
    pub store_failures: u64,
    /// Poll or acknowledgment failures.
    pub transport_errors: u64,
    /// Dropped events copied to the dead-letter topic.
    pub dead_lettered: u64,
}

/// Errors surfaced by the forwarder itself.
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// `run` was called on a forwarder that already shut down.
    #[error("forwarder has shut down and cannot be restarted")]
    ShutDown,
}

struct DeadLetter {
    publisher: Arc<dyn EventPublisher>,
    topic: String,
}

/// Consumes one subscription and feeds the aggregation store.
pub struct Forwarder<S> {
    subscription: S,
    oracle: Arc<dyn StatusOracle>,
    store: Arc<dyn AggregationStore>,
    dead_letter: Option<DeadLetter>,
    shutdown: CancellationToken,
    poll_timeout: Duration,
    state: ForwarderState,
    stats: ForwarderStats,
}

impl<S: Subscription> Forwarder<S> {
    /// Creates an idle forwarder that stops once `shutdown` is cancelled.
    #[must_use]
    pub fn new(
        subscription: S,
        oracle: Arc<dyn StatusOracle>,
        store: Arc<dyn AggregationStore>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            subscription,
            oracle,
            store,
            dead_letter: None,
            shutdown,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            state: ForwarderState::Idle,
            stats: ForwarderStats::default(),
        }
    }

    /// Sets how long each poll waits for a message.
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Copies every dropped event to `topic` instead of losing it silently.
    #[must_use]
    pub fn with_dead_letter(
        mut self,
        publisher: Arc<dyn EventPublisher>,
        topic: impl Into<String>,
    ) -> Self {
        self.dead_letter = Some(DeadLetter {
            publisher,
            topic: topic.into(),
        });
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ForwarderState {
        self.state
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> ForwarderStats {
        self.stats
    }

    fn transition(&mut self, next: ForwarderState) {
        trace!(from = ?self.state, to = ?next, "forwarder state");
        self.state = next;
    }

    /// Polls and processes messages until the shutdown token is cancelled.
    ///
    /// Cancellation interrupts a pending poll but never a message being
    /// processed. Messages are not drained on shutdown.
    ///
    /// # Errors
    ///
    /// Returns `ForwarderError::ShutDown` if this forwarder already ran to
    /// shutdown.
    pub async fn run(&mut self) -> Result<ForwarderStats, ForwarderError> {
        if self.state == ForwarderState::ShuttingDown {
            return Err(ForwarderError::ShutDown);
        }
        info!(poll_timeout_ms = self.poll_timeout.as_millis(), "forwarder started");

        while !self.shutdown.is_cancelled() {
            self.transition(ForwarderState::Polling);
            let polled = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                polled = self.subscription.poll(self.poll_timeout) => polled,
            };

            match polled {
                Ok(Some(message)) => {
                    self.transition(ForwarderState::Processing);
                    self.handle(message).await;
                }
                Ok(None) => {}
                Err(e) => {
                    self.stats.transport_errors += 1;
                    warn!(error = %e, "poll failed");
                }
            }
            self.transition(ForwarderState::Idle);
        }

        self.transition(ForwarderState::ShuttingDown);
        info!(stats = ?self.stats, "forwarder shut down");
        Ok(self.stats)
    }

    async fn handle(&mut self, message: ReceivedMessage) {
        self.stats.received += 1;
        let disposition = self.process(&message).await;
        match disposition {
            Disposition::Aggregated(_) => self.stats.aggregated += 1,
            Disposition::Discarded => self.stats.discarded += 1,
            Disposition::OracleFailed => self.stats.oracle_failures += 1,
            Disposition::StoreFailed => self.stats.store_failures += 1,
        }

        if let Err(e) = self.subscription.acknowledge(&message).await {
            self.stats.transport_errors += 1;
            warn!(offset = message.offset, error = %e, "acknowledge failed");
        }
    }

    /// Decodes, resolves and aggregates one message. Never retries.
    #[instrument(
        skip(self, message),
        fields(offset = message.offset, attempt = message.delivery_attempt)
    )]
    pub async fn process(&mut self, message: &ReceivedMessage) -> Disposition {
        let event = match TrackingEvent::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "discarding message");
                return Disposition::Discarded;
            }
        };

        let resolved = match self.resolve_status(&event).await {
            Ok(status) => event.clone().resolve(status),
            Err(e) => {
                warn!(event_id = %event.event.event_id, error = %e, "dropping event: status unresolved");
                self.dead_letter(&event).await;
                return Disposition::OracleFailed;
            }
        };

        match self.store.upsert(&resolved).await {
            Ok(outcome) => {
                debug!(
                    event_id = %event.event.event_id,
                    status = %resolved.status(),
                    ?outcome,
                    "event aggregated"
                );
                Disposition::Aggregated(outcome)
            }
            Err(e) => {
                warn!(event_id = %event.event.event_id, error = %e, "dropping event: upsert failed");
                self.dead_letter(&event).await;
                Disposition::StoreFailed
            }
        }
    }

    async fn resolve_status(&self, event: &TrackingEvent) -> Result<String, PipelineError> {
        let query = EventStatus::from(event);
        let answer = self.oracle.resolve(&query).await?;
        if answer.event_id != query.event_id {
            return Err(PipelineError::Oracle(format!(
                "oracle answered for {} instead of {}",
                answer.event_id, query.event_id
            )));
        }
        Ok(answer.status)
    }

    async fn dead_letter(&mut self, event: &TrackingEvent) {
        let Some(dead_letter) = &self.dead_letter else {
            return;
        };
        let published = match event.encode() {
            Ok(payload) => {
                dead_letter
                    .publisher
                    .publish(&dead_letter.topic, &event.partition_key(), payload)
                    .await
            }
            Err(e) => Err(e),
        };
        match published {
            Ok(_) => self.stats.dead_lettered += 1,
            Err(e) => warn!(event_id = %event.event.event_id, error = %e, "dead-letter publish failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tally_core::aggregation::AggregationKey;
    use tally_core::event::{EventDetail, EventInfo};
    use tally_test_support::{
        FailingAggregationStore, FailingOracle, InMemoryAggregationStore, InMemoryBroker,
        ScriptedSubscription, StaticOracle,
    };

    use super::*;

    fn event(event_id: &str) -> TrackingEvent {
        TrackingEvent {
            store_id: "store1".to_owned(),
            client_id: "client1".to_owned(),
            bucket_date: 1_700_000_000,
            event_type: "event_type1".to_owned(),
            count: 1,
            event: EventInfo {
                event_id: event_id.to_owned(),
                timestamp: 1_700_000_001,
                status: "success".to_owned(),
            },
        }
    }

    fn key() -> AggregationKey {
        event("evt1").key()
    }

    fn message(offset: i64, event: &TrackingEvent) -> ReceivedMessage {
        ScriptedSubscription::message(offset, event.encode().unwrap())
    }

    async fn run_script(
        script: Vec<Result<Option<ReceivedMessage>, PipelineError>>,
        oracle: Arc<dyn StatusOracle>,
        store: Arc<dyn AggregationStore>,
    ) -> (ForwarderStats, Vec<i64>) {
        let shutdown = CancellationToken::new();
        let subscription = ScriptedSubscription::new(script, shutdown.clone());
        let acked = subscription.acknowledged();
        let mut forwarder = Forwarder::new(subscription, oracle, store, shutdown);
        let stats = forwarder.run().await.unwrap();
        let acked = acked.lock().unwrap().clone();
        (stats, acked)
    }

    #[tokio::test]
    async fn test_resolved_event_produces_expected_document() {
        let store = Arc::new(InMemoryAggregationStore::new());

        let (stats, acked) = run_script(
            vec![Ok(Some(message(0, &event("evt1"))))],
            Arc::new(StaticOracle::new("success")),
            store.clone(),
        )
        .await;

        assert_eq!(stats.aggregated, 1);
        assert_eq!(acked, vec![0]);
        let doc = store.document(&key()).unwrap();
        assert_eq!(doc.store_id, "store1");
        assert_eq!(doc.client_id, "client1");
        assert_eq!(doc.bucket_date, 1_700_000_000);
        assert_eq!(doc.count, 1);
        assert_eq!(
            doc.list_success,
            vec![EventDetail {
                event_id: "evt1".to_owned(),
                timestamp: 1_700_000_001,
                event_type: "event_type1".to_owned(),
            }]
        );
        assert!(doc.list_failure.is_empty());
    }

    #[tokio::test]
    async fn test_oracle_status_overrides_provisional_status() {
        let store = Arc::new(InMemoryAggregationStore::new());
        let oracle = StaticOracle::new("success").with_override("evt2", "failure");

        run_script(
            vec![
                Ok(Some(message(0, &event("evt1")))),
                Ok(Some(message(1, &event("evt2")))),
            ],
            Arc::new(oracle),
            store.clone(),
        )
        .await;

        let doc = store.document(&key()).unwrap();
        assert_eq!(doc.count, 2);
        assert_eq!(doc.list_success.len(), 1);
        assert_eq!(doc.list_failure.len(), 1);
        assert_eq!(doc.list_failure[0].event_id, "evt2");
    }

    #[tokio::test]
    async fn test_oracle_receives_full_event_identity() {
        let oracle = Arc::new(StaticOracle::new("success"));

        run_script(
            vec![Ok(Some(message(0, &event("evt1"))))],
            oracle.clone(),
            Arc::new(InMemoryAggregationStore::new()),
        )
        .await;

        let queries = oracle.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0], EventStatus::from(&event("evt1")));
    }

    #[tokio::test]
    async fn test_undecodable_message_is_discarded_and_acknowledged() {
        let store = Arc::new(InMemoryAggregationStore::new());
        let mut wrong_count = event("evt2");
        wrong_count.count = 5;

        let (stats, acked) = run_script(
            vec![
                Ok(Some(ScriptedSubscription::message(0, b"not json".to_vec()))),
                Ok(Some(message(1, &wrong_count))),
                Ok(Some(message(2, &event("evt3")))),
            ],
            Arc::new(StaticOracle::new("success")),
            store.clone(),
        )
        .await;

        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.aggregated, 1);
        assert_eq!(acked, vec![0, 1, 2]);
        assert_eq!(store.document(&key()).unwrap().count, 1);
    }

    // Dropping events on oracle failure is the accepted trade-off: the store
    // must not be touched and the message is not redelivered.
    #[tokio::test]
    async fn test_oracle_failure_drops_event_without_touching_store() {
        let store = Arc::new(InMemoryAggregationStore::new());

        let (stats, acked) = run_script(
            vec![Ok(Some(message(0, &event("evt1"))))],
            Arc::new(FailingOracle),
            store.clone(),
        )
        .await;

        assert_eq!(stats.oracle_failures, 1);
        assert_eq!(stats.aggregated, 0);
        assert_eq!(acked, vec![0]);
        assert_eq!(store.upsert_count(), 0);
        assert!(store.document(&key()).is_none());
    }

    #[tokio::test]
    async fn test_oracle_answer_for_another_event_is_rejected() {
        struct WrongEventOracle;

        #[async_trait]
        impl StatusOracle for WrongEventOracle {
            async fn resolve(&self, query: &EventStatus) -> Result<EventStatus, PipelineError> {
                Ok(EventStatus {
                    event_id: "someone-else".to_owned(),
                    ..query.clone()
                })
            }
        }

        let store = Arc::new(InMemoryAggregationStore::new());
        let (stats, _) = run_script(
            vec![Ok(Some(message(0, &event("evt1"))))],
            Arc::new(WrongEventOracle),
            store.clone(),
        )
        .await;

        assert_eq!(stats.oracle_failures, 1);
        assert_eq!(store.upsert_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_drops_event_and_continues() {
        let (stats, acked) = run_script(
            vec![
                Ok(Some(message(0, &event("evt1")))),
                Ok(Some(message(1, &event("evt2")))),
            ],
            Arc::new(StaticOracle::new("success")),
            Arc::new(FailingAggregationStore),
        )
        .await;

        assert_eq!(stats.store_failures, 2);
        assert_eq!(acked, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_transport_errors_and_empty_polls_are_not_fatal() {
        let store = Arc::new(InMemoryAggregationStore::new());

        let (stats, _) = run_script(
            vec![
                Ok(None),
                Err(PipelineError::Transport("broker unreachable".into())),
                Ok(None),
                Ok(Some(message(0, &event("evt1")))),
            ],
            Arc::new(StaticOracle::new("success")),
            store.clone(),
        )
        .await;

        assert_eq!(stats.transport_errors, 1);
        assert_eq!(stats.received, 1);
        assert_eq!(stats.aggregated, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_receives_dropped_events() {
        let dead_letters = InMemoryBroker::new();
        let shutdown = CancellationToken::new();
        let subscription = ScriptedSubscription::new(
            vec![Ok(Some(message(0, &event("evt1"))))],
            shutdown.clone(),
        );
        let mut forwarder = Forwarder::new(
            subscription,
            Arc::new(FailingOracle),
            Arc::new(InMemoryAggregationStore::new()),
            shutdown,
        )
        .with_dead_letter(Arc::new(dead_letters.clone()), "tracking-events-dlq");

        let stats = forwarder.run().await.unwrap();

        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(
            dead_letters.published_events("tracking-events-dlq"),
            vec![event("evt1")]
        );
    }

    #[tokio::test]
    async fn test_cancelled_forwarder_never_polls_and_cannot_restart() {
        let broker = InMemoryBroker::new();
        broker.push_raw("tracking-events", event("evt1").encode().unwrap());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let store = Arc::new(InMemoryAggregationStore::new());
        let mut forwarder = Forwarder::new(
            broker.subscribe("tracking-events", "g1"),
            Arc::new(StaticOracle::new("success")),
            store.clone(),
            shutdown,
        );
        assert_eq!(forwarder.state(), ForwarderState::Idle);

        let stats = forwarder.run().await.unwrap();

        assert_eq!(stats, ForwarderStats::default());
        assert_eq!(forwarder.state(), ForwarderState::ShuttingDown);
        assert!(matches!(forwarder.run().await, Err(ForwarderError::ShutDown)));
        assert_eq!(store.upsert_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_idle_poll() {
        let broker = InMemoryBroker::new();
        let shutdown = CancellationToken::new();
        let mut forwarder = Forwarder::new(
            broker.subscribe("tracking-events", "g1"),
            Arc::new(StaticOracle::new("success")),
            Arc::new(InMemoryAggregationStore::new()),
            shutdown.clone(),
        )
        .with_poll_timeout(Duration::from_secs(60));

        let handle = tokio::spawn(async move { forwarder.run().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats.received, 0);
    }
}
