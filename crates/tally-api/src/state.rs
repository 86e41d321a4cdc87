//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use tally_generator::{BatchSpec, EventGenerator};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Publishes generated batches to the transport.
    pub generator: Arc<EventGenerator>,
    /// Batch used when `POST /receive-event` carries no body.
    pub default_batch: BatchSpec,
    /// Latency added by the stub status oracle.
    pub oracle_stub_delay: Duration,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(generator: Arc<EventGenerator>, default_batch: BatchSpec) -> Self {
        Self {
            generator,
            default_batch,
            oracle_stub_delay: Duration::ZERO,
        }
    }

    /// Sets the stub oracle latency.
    #[must_use]
    pub fn with_oracle_stub_delay(mut self, delay: Duration) -> Self {
        self.oracle_stub_delay = delay;
        self
    }
}
