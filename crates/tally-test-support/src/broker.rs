//! Test transports — in-memory `EventPublisher` and `Subscription`
//! implementations for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tally_core::error::PipelineError;
use tally_core::event::TrackingEvent;
use tally_core::transport::{Delivery, EventPublisher, ReceivedMessage, Subscription};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct GroupState {
    next_offset: usize,
    redeliver: VecDeque<i64>,
    attempts: HashMap<i64, i32>,
    acked: HashSet<i64>,
}

#[derive(Debug, Default)]
struct TopicLog {
    messages: Vec<Vec<u8>>,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: Mutex<HashMap<String, TopicLog>>,
    published: Notify,
}

/// An in-memory, at-least-once broker with consumer groups.
///
/// Messages polled but not acknowledged when a subscription is dropped are
/// queued for redelivery to the next poll in the same group, which is how
/// tests simulate a consumer crashing mid-message.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `group` on `topic`. Every member of a group shares one cursor.
    #[must_use]
    pub fn subscribe(&self, topic: &str, group: &str) -> InMemorySubscription {
        InMemorySubscription {
            state: Arc::clone(&self.state),
            topic: topic.to_owned(),
            group: group.to_owned(),
            in_flight: HashSet::new(),
        }
    }

    /// Returns every payload ever published to `topic`, in offset order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn payloads(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// Decodes every payload published to `topic`.
    ///
    /// # Panics
    ///
    /// Panics if a payload is not a valid tracking event.
    pub fn published_events(&self, topic: &str) -> Vec<TrackingEvent> {
        self.payloads(topic)
            .iter()
            .map(|payload| TrackingEvent::decode(payload).unwrap())
            .collect()
    }

    /// Number of messages on `topic` that `group` has acknowledged.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn acknowledged(&self, topic: &str, group: &str) -> usize {
        self.state
            .topics
            .lock()
            .unwrap()
            .get(topic)
            .and_then(|log| log.groups.get(group))
            .map_or(0, |g| g.acked.len())
    }

    /// Appends a raw payload without going through `publish`, e.g. to seed
    /// a malformed message.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn push_raw(&self, topic: &str, payload: Vec<u8>) -> i64 {
        let offset = {
            let mut topics = self.state.topics.lock().unwrap();
            let log = topics.entry(topic.to_owned()).or_default();
            log.messages.push(payload);
            i64::try_from(log.messages.len() - 1).unwrap()
        };
        self.state.published.notify_waiters();
        offset
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        _partition_key: &str,
        payload: Vec<u8>,
    ) -> Result<Delivery, PipelineError> {
        let offset = self.push_raw(topic, payload);
        Ok(Delivery {
            topic: topic.to_owned(),
            offset,
        })
    }
}

/// One consumer-group member of an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemorySubscription {
    state: Arc<BrokerState>,
    topic: String,
    group: String,
    in_flight: HashSet<i64>,
}

impl InMemorySubscription {
    fn try_take(&mut self) -> Option<ReceivedMessage> {
        let mut topics = self.state.topics.lock().unwrap();
        let log = topics.entry(self.topic.clone()).or_default();
        let group = log.groups.entry(self.group.clone()).or_default();

        let offset = if let Some(offset) = group.redeliver.pop_front() {
            offset
        } else if group.next_offset < log.messages.len() {
            group.next_offset += 1;
            i64::try_from(group.next_offset - 1).unwrap()
        } else {
            return None;
        };

        let attempt = group.attempts.entry(offset).or_insert(0);
        *attempt += 1;
        let delivery_attempt = *attempt;
        self.in_flight.insert(offset);

        Some(ReceivedMessage {
            topic: self.topic.clone(),
            offset,
            delivery_attempt,
            payload: log.messages[usize::try_from(offset).unwrap()].clone(),
        })
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<ReceivedMessage>, PipelineError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let state = Arc::clone(&self.state);
        loop {
            let published = state.published.notified();
            if let Some(message) = self.try_take() {
                return Ok(Some(message));
            }
            if tokio::time::timeout_at(deadline, published).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn acknowledge(&mut self, message: &ReceivedMessage) -> Result<(), PipelineError> {
        self.in_flight.remove(&message.offset);
        let mut topics = self.state.topics.lock().unwrap();
        let log = topics.entry(self.topic.clone()).or_default();
        log.groups
            .entry(self.group.clone())
            .or_default()
            .acked
            .insert(message.offset);
        Ok(())
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        if let Ok(mut topics) = self.state.topics.lock() {
            if let Some(group) = topics
                .get_mut(&self.topic)
                .and_then(|log| log.groups.get_mut(&self.group))
            {
                let mut unacked: Vec<i64> = self.in_flight.drain().collect();
                unacked.sort_unstable();
                group.redeliver.extend(unacked);
            }
        }
        self.state.published.notify_waiters();
    }
}

/// A publisher that forwards to an [`InMemoryBroker`] but fails for the
/// listed event ids, leaving every other publish visible.
#[derive(Debug)]
pub struct RejectingPublisher {
    inner: InMemoryBroker,
    rejected: HashSet<String>,
}

impl RejectingPublisher {
    /// Wrap `inner`, failing publishes of events whose id is in `rejected`.
    #[must_use]
    pub fn new(inner: InMemoryBroker, rejected: &[&str]) -> Self {
        Self {
            inner,
            rejected: rejected.iter().map(|id| (*id).to_owned()).collect(),
        }
    }
}

#[async_trait]
impl EventPublisher for RejectingPublisher {
    async fn publish(
        &self,
        topic: &str,
        partition_key: &str,
        payload: Vec<u8>,
    ) -> Result<Delivery, PipelineError> {
        let event = TrackingEvent::decode(&payload)?;
        if self.rejected.contains(&event.event.event_id) {
            return Err(PipelineError::Transport(format!(
                "delivery failed for {}",
                event.event.event_id
            )));
        }
        self.inner.publish(topic, partition_key, payload).await
    }
}

/// A subscription that replays a fixed script of poll results, records
/// acknowledgments, and cancels `on_exhausted` once the script runs out.
#[derive(Debug)]
pub struct ScriptedSubscription {
    script: VecDeque<Result<Option<ReceivedMessage>, PipelineError>>,
    acknowledged: Arc<Mutex<Vec<i64>>>,
    on_exhausted: CancellationToken,
}

impl ScriptedSubscription {
    /// Create a subscription that yields `script` in order.
    #[must_use]
    pub fn new(
        script: Vec<Result<Option<ReceivedMessage>, PipelineError>>,
        on_exhausted: CancellationToken,
    ) -> Self {
        Self {
            script: script.into(),
            acknowledged: Arc::new(Mutex::new(Vec::new())),
            on_exhausted,
        }
    }

    /// Builds a message at `offset` carrying `payload`.
    #[must_use]
    pub fn message(offset: i64, payload: Vec<u8>) -> ReceivedMessage {
        ReceivedMessage {
            topic: "tracking-events".to_owned(),
            offset,
            delivery_attempt: 1,
            payload,
        }
    }

    /// Shared handle on the offsets acknowledged so far.
    #[must_use]
    pub fn acknowledged(&self) -> Arc<Mutex<Vec<i64>>> {
        Arc::clone(&self.acknowledged)
    }
}

#[async_trait]
impl Subscription for ScriptedSubscription {
    async fn poll(&mut self, _timeout: Duration) -> Result<Option<ReceivedMessage>, PipelineError> {
        match self.script.pop_front() {
            Some(result) => result,
            None => {
                self.on_exhausted.cancel();
                Ok(None)
            }
        }
    }

    async fn acknowledge(&mut self, message: &ReceivedMessage) -> Result<(), PipelineError> {
        self.acknowledged.lock().unwrap().push(message.offset);
        Ok(())
    }
}
