//! Shared test fakes and utilities for the Tally event aggregation pipeline.

mod broker;
mod clock;
mod oracle;
mod rng;
mod store;

pub use broker::{InMemoryBroker, InMemorySubscription, RejectingPublisher, ScriptedSubscription};
pub use clock::FixedClock;
pub use oracle::{FailingOracle, StaticOracle};
pub use rng::SequenceRng;
pub use store::{FailingAggregationStore, InMemoryAggregationStore};
