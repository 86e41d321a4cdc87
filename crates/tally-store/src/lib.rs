//! Tally Store — aggregation documents on `PostgreSQL`.

pub mod pg_aggregation_store;
