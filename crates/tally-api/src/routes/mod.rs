//! Route modules.

pub mod health;
pub mod ingest;
pub mod oracle;
