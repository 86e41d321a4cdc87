//! Test stores — fake `AggregationStore` implementations for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tally_core::aggregation::{
    AggregationDocument, AggregationKey, AggregationStore, UpsertOutcome,
};
use tally_core::error::PipelineError;
use tally_core::event::ResolvedEvent;

/// An in-memory aggregation store. Each upsert runs entirely under one lock,
/// which gives it the same document-level atomicity as the real store.
#[derive(Debug, Default)]
pub struct InMemoryAggregationStore {
    documents: Mutex<HashMap<AggregationKey, AggregationDocument>>,
    upserts: Mutex<usize>,
}

impl InMemoryAggregationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the document for `key`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn document(&self, key: &AggregationKey) -> Option<AggregationDocument> {
        self.documents.lock().unwrap().get(key).cloned()
    }

    /// Returns a snapshot of every document.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn documents(&self) -> Vec<AggregationDocument> {
        self.documents.lock().unwrap().values().cloned().collect()
    }

    /// Number of upserts applied so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn upsert_count(&self) -> usize {
        *self.upserts.lock().unwrap()
    }
}

#[async_trait]
impl AggregationStore for InMemoryAggregationStore {
    async fn upsert(&self, event: &ResolvedEvent) -> Result<UpsertOutcome, PipelineError> {
        let key = event.key();
        let mut documents = self.documents.lock().unwrap();
        let outcome = if documents.contains_key(&key) {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        };
        documents
            .entry(key)
            .or_insert_with_key(AggregationDocument::set_on_insert)
            .apply(event);
        *self.upserts.lock().unwrap() += 1;
        Ok(outcome)
    }

    async fn find(
        &self,
        key: &AggregationKey,
    ) -> Result<Option<AggregationDocument>, PipelineError> {
        Ok(self.document(key))
    }
}

/// An aggregation store that always returns a store error. Useful for
/// testing drop paths.
#[derive(Debug)]
pub struct FailingAggregationStore;

#[async_trait]
impl AggregationStore for FailingAggregationStore {
    async fn upsert(&self, _event: &ResolvedEvent) -> Result<UpsertOutcome, PipelineError> {
        Err(PipelineError::Store("connection refused".into()))
    }

    async fn find(
        &self,
        _key: &AggregationKey,
    ) -> Result<Option<AggregationDocument>, PipelineError> {
        Err(PipelineError::Store("connection refused".into()))
    }
}
