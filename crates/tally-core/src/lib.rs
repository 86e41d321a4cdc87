//! Tally Core — shared domain model and pipeline seams.
//!
//! This crate defines the tracking event wire model, the aggregation
//! document, and the traits every pipeline stage is written against
//! (transport, status oracle, aggregation store, clock, RNG). It contains
//! no infrastructure code.

pub mod aggregation;
pub mod clock;
pub mod error;
pub mod event;
pub mod oracle;
pub mod rng;
pub mod transport;
