//! HTTP implementation of the `StatusOracle` trait.

use std::time::Duration;

use async_trait::async_trait;
use tally_core::error::PipelineError;
use tally_core::oracle::{EventStatus, StatusOracle};
use tracing::{debug, instrument};

/// Path of the resolution endpoint, relative to the oracle base URL.
pub const RESOLVE_PATH: &str = "/update-event";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Status oracle reached over JSON-over-HTTP.
#[derive(Debug, Clone)]
pub struct HttpStatusOracle {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpStatusOracle {
    /// Creates a client for the oracle at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Oracle` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Oracle(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}{RESOLVE_PATH}", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl StatusOracle for HttpStatusOracle {
    #[instrument(skip(self, query), fields(event_id = %query.event_id))]
    async fn resolve(&self, query: &EventStatus) -> Result<EventStatus, PipelineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(query)
            .send()
            .await
            .map_err(|e| PipelineError::Oracle(format!("status oracle request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Oracle(format!(
                "status oracle returned {status}: {body}"
            )));
        }

        let resolved: EventStatus = response.json().await.map_err(|e| {
            PipelineError::Oracle(format!("failed to parse status oracle response: {e}"))
        })?;
        debug!(status = %resolved.status, "status resolved");
        Ok(resolved)
    }
}
