//! Test oracles — fake `StatusOracle` implementations for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tally_core::error::PipelineError;
use tally_core::oracle::{EventStatus, StatusOracle};

/// An oracle that answers every query with a fixed status, except for event
/// ids given an override. Records every query it receives.
#[derive(Debug)]
pub struct StaticOracle {
    status: String,
    overrides: HashMap<String, String>,
    queries: Mutex<Vec<EventStatus>>,
}

impl StaticOracle {
    /// Create an oracle that resolves every event to `status`.
    #[must_use]
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            overrides: HashMap::new(),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Resolve `event_id` to `status` instead of the default.
    #[must_use]
    pub fn with_override(mut self, event_id: impl Into<String>, status: impl Into<String>) -> Self {
        self.overrides.insert(event_id.into(), status.into());
        self
    }

    /// Returns a snapshot of all queries received.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn queries(&self) -> Vec<EventStatus> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusOracle for StaticOracle {
    async fn resolve(&self, query: &EventStatus) -> Result<EventStatus, PipelineError> {
        self.queries.lock().unwrap().push(query.clone());
        let status = self
            .overrides
            .get(&query.event_id)
            .unwrap_or(&self.status)
            .clone();
        Ok(EventStatus {
            status,
            ..query.clone()
        })
    }
}

/// An oracle that always fails, as if the downstream service were down.
#[derive(Debug)]
pub struct FailingOracle;

#[async_trait]
impl StatusOracle for FailingOracle {
    async fn resolve(&self, _query: &EventStatus) -> Result<EventStatus, PipelineError> {
        Err(PipelineError::Oracle("oracle unavailable".into()))
    }
}
