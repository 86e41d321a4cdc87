//! Tally — event forwarder.
//!
//! Drains the transport one message at a time: decode, resolve the status
//! with the oracle, upsert into the aggregation store, acknowledge. Every
//! failure past the transport drops the event; the message is acknowledged
//! regardless, so only messages still in flight at shutdown or crash are
//! ever delivered again.

pub mod forwarder;

pub use forwarder::{Disposition, Forwarder, ForwarderError, ForwarderState, ForwarderStats};
