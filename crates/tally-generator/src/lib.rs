//! Tally — tracking event generation.
//!
//! Plans batches of synthetic tracking events and publishes them to the
//! transport concurrently, one task per event, reporting the outcome of
//! every publish.

pub mod batch;
pub mod fanout;

pub use batch::BatchSpec;
pub use fanout::{BatchReport, BatchSummary, EventGenerator, PublishOutcome};
