//! Aggregation documents and the store abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::event::{EventDetail, Outcome, ResolvedEvent};

/// Identifies one aggregation document: same store, same client, same
/// reporting bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationKey {
    /// Store identifier.
    pub store_id: String,
    /// Client identifier.
    pub client_id: String,
    /// Epoch-seconds start of the bucket.
    pub bucket_date: i64,
}

/// Per-key summary of every event aggregated so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationDocument {
    /// Store identifier.
    pub store_id: String,
    /// Client identifier.
    pub client_id: String,
    /// Epoch-seconds start of the bucket.
    pub bucket_date: i64,
    /// Sum of the declared counts of every aggregated event.
    pub count: i64,
    /// Events resolved as successful, in arrival order.
    pub list_success: Vec<EventDetail>,
    /// Events resolved as anything else, in arrival order.
    pub list_failure: Vec<EventDetail>,
}

impl AggregationDocument {
    /// Builds the document a first upsert creates: key fields set, zero
    /// count, empty lists. Nothing is incremented or appended here.
    #[must_use]
    pub fn set_on_insert(key: &AggregationKey) -> Self {
        Self {
            store_id: key.store_id.clone(),
            client_id: key.client_id.clone(),
            bucket_date: key.bucket_date,
            count: 0,
            list_success: Vec::new(),
            list_failure: Vec::new(),
        }
    }

    /// Returns the document's key.
    #[must_use]
    pub fn key(&self) -> AggregationKey {
        AggregationKey {
            store_id: self.store_id.clone(),
            client_id: self.client_id.clone(),
            bucket_date: self.bucket_date,
        }
    }

    /// Applies the update step of an upsert: increment the count and append
    /// the detail to the list selected by the outcome.
    pub fn apply(&mut self, event: &ResolvedEvent) {
        self.count += event.count();
        match event.outcome() {
            Outcome::Success => self.list_success.push(event.detail()),
            Outcome::Failure => self.list_failure.push(event.detail()),
        }
    }

    /// Number of list entries across both lists.
    #[must_use]
    pub fn recorded_events(&self) -> usize {
        self.list_success.len() + self.list_failure.len()
    }
}

/// Whether an upsert created the document or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No document existed; it was created and the update applied.
    Inserted,
    /// The existing document was updated.
    Updated,
}

/// Store of aggregation documents.
///
/// Implementations must apply each upsert as a single atomic document-level
/// operation. Read-then-write at the application level loses updates under
/// concurrent forwarders.
#[async_trait]
pub trait AggregationStore: Send + Sync {
    /// Creates the document for the event's key if absent, then increments
    /// its count and appends the event's detail to the outcome's list.
    async fn upsert(&self, event: &ResolvedEvent) -> Result<UpsertOutcome, PipelineError>;

    /// Loads the document for `key`, if one exists.
    async fn find(&self, key: &AggregationKey)
    -> Result<Option<AggregationDocument>, PipelineError>;
}
