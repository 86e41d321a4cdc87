//! Wall-clock access, injectable so event timestamps and buckets are
//! deterministic under test.

use chrono::{DateTime, Utc};

use crate::event::bucket_start;

/// Source of the current time for event generation.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Epoch seconds of the UTC midnight opening today's bucket.
    fn current_bucket(&self) -> i64 {
        bucket_start(self.now())
    }
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
