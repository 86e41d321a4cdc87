//! Tally — HTTP ingestion server and process wiring.

pub mod config;
pub mod error;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod telemetry;
