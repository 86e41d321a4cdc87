//! Tally Transport — a durable, at-least-once topic log on `PostgreSQL`.
//!
//! Publishing appends to `transport_messages`. Each consumer group tracks
//! delivery in `transport_claims`: polling claims the oldest message that
//! the group has neither acknowledged nor leased, and a lease that lapses
//! without an acknowledgment makes the message eligible for redelivery.

pub mod pg_transport;
