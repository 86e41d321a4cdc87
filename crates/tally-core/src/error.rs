//! Pipeline error types.

use thiserror::Error;

/// Error raised by any stage of the aggregation pipeline.
///
/// Each variant names the hop that failed. None of them is fatal to a
/// running forwarder; the caller decides whether to drop, skip or abort.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Publishing to or polling from the transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A transport payload could not be decoded into a tracking event.
    #[error("decode error: {0}")]
    Decode(String),

    /// A tracking event or batch specification violated a domain rule.
    #[error("validation error: {0}")]
    Validation(String),

    /// The status oracle call failed or returned a malformed response.
    #[error("status oracle error: {0}")]
    Oracle(String),

    /// The aggregation store rejected or failed the update.
    #[error("aggregation store error: {0}")]
    Store(String),

    /// Shared process state is unusable, e.g. a lock poisoned by a panic.
    #[error("internal error: {0}")]
    Internal(String),
}
