//! Process configuration read from the environment.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tally_generator::BatchSpec;
use uuid::Uuid;

use crate::error::AppError;

/// Settings shared by the API server and the forwarder process.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` connection string.
    pub database_url: String,
    /// Interface the API server binds to.
    pub host: String,
    /// Port the API server binds to.
    pub port: u16,
    /// Topic tracking events are published to and consumed from.
    pub topic: String,
    /// Consumer group the forwarder joins.
    pub group_id: String,
    /// Identity of this forwarder within its group.
    pub consumer_id: String,
    /// How long one forwarder poll waits for a message.
    pub poll_timeout: Duration,
    /// How long a claimed message stays invisible to other group members.
    pub lease: Duration,
    /// Base URL of the status oracle.
    pub oracle_url: String,
    /// Per-request timeout for the status oracle.
    pub oracle_timeout: Duration,
    /// Artificial latency added by the stub oracle endpoint.
    pub oracle_stub_delay: Duration,
    /// Where the forwarder copies dropped events, if anywhere.
    pub dead_letter_topic: Option<String>,
    /// Batch published by `POST /receive-event` when the body is empty.
    pub default_batch: BatchSpec,
    /// Cap on concurrent publishes per batch.
    pub max_in_flight: Option<usize>,
    /// OTLP collector endpoint; span export is off when unset.
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or any value
    /// fails to parse.
    pub fn from_env() -> Result<Self, AppError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(AppError::Config(format!("failed to load .env: {e}")));
            }
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup. Blank
    /// values count as unset.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `DATABASE_URL` is missing or any value
    /// fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = var("DATABASE_URL")
            .ok_or_else(|| AppError::Config("DATABASE_URL environment variable must be set".into()))?;

        let default_batch = BatchSpec::Fixed {
            store_id: var("STORE_ID").unwrap_or_else(|| "store1".to_owned()),
            client_id: var("CLIENT_ID").unwrap_or_else(|| "client1".to_owned()),
            event_type: var("EVENT_TYPE").unwrap_or_else(|| "event_type1".to_owned()),
            events: parsed(&var, "BATCH_EVENTS", 10)?,
            bucket_days: parsed(&var, "BATCH_BUCKET_DAYS", 1)?,
            base_bucket: optional(&var, "BATCH_BASE_BUCKET")?,
        };
        default_batch
            .validate()
            .map_err(|e| AppError::Config(format!("default batch is invalid: {e}")))?;

        Ok(Self {
            database_url,
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parsed(&var, "PORT", 3000)?,
            topic: var("TRANSPORT_TOPIC").unwrap_or_else(|| "tracking-events".to_owned()),
            group_id: var("CONSUMER_GROUP_ID").unwrap_or_else(|| "tally-forwarders".to_owned()),
            consumer_id: var("CONSUMER_ID").unwrap_or_else(|| Uuid::new_v4().to_string()),
            poll_timeout: Duration::from_millis(parsed(&var, "POLL_TIMEOUT_MS", 100)?),
            lease: Duration::from_secs(parsed(&var, "TRANSPORT_LEASE_SECS", 30)?),
            oracle_url: var("ORACLE_URL").unwrap_or_else(|| "http://127.0.0.1:3000".to_owned()),
            oracle_timeout: Duration::from_millis(parsed(&var, "ORACLE_TIMEOUT_MS", 5_000)?),
            oracle_stub_delay: Duration::from_millis(parsed(&var, "ORACLE_STUB_DELAY_MS", 0)?),
            dead_letter_topic: var("DEAD_LETTER_TOPIC"),
            default_batch,
            max_in_flight: optional(&var, "BATCH_MAX_IN_FLIGHT")?,
            otlp_endpoint: var("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

fn parsed<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(optional(var, name)?.unwrap_or(default))
}

fn optional<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    var(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| AppError::Config(format!("{name} is invalid ({raw:?}): {e}")))
        })
        .transpose()
}
