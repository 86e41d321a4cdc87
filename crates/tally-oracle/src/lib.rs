//! Tally Oracle — client for the downstream status-resolution service.

pub mod http_oracle;
