//! Frozen `Clock` for tests.

use chrono::{DateTime, TimeZone, Utc};
use tally_core::clock::Clock;

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Stops the clock at the given UTC wall time.
    ///
    /// # Panics
    ///
    /// Panics if the components do not name a valid instant.
    #[must_use]
    pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Self(Utc.with_ymd_and_hms(year, month, day, hour, min, sec).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
