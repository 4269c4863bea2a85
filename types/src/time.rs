//! Timestamp type used throughout the engine.
//!
//! Timestamps are Unix epoch seconds (UTC). Expiry arithmetic is exact-day
//! in UTC: `days × 86 400` seconds, no calendar adjustments.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds in one UTC day.
pub const SECS_PER_DAY: u64 = 86_400;

/// A Unix timestamp in seconds since epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn new(secs: u64) -> Self {
        Self(secs)
    }

    /// Get the current system time as a `Timestamp`.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs();
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// This timestamp plus a number of seconds (saturating).
    pub fn plus_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// This timestamp plus a number of exact UTC days (saturating).
    pub fn plus_days(&self, days: u64) -> Self {
        self.plus_secs(days.saturating_mul(SECS_PER_DAY))
    }

    /// Seconds elapsed since this timestamp (relative to `now`).
    pub fn elapsed_since(&self, now: Timestamp) -> u64 {
        now.0.saturating_sub(self.0)
    }

    /// Seconds remaining until this timestamp (relative to `now`).
    pub fn remaining_from(&self, now: Timestamp) -> u64 {
        self.0.saturating_sub(now.0)
    }

    /// Whether this timestamp + duration has passed relative to `now`.
    /// The boundary instant itself has not yet passed.
    pub fn has_expired(&self, duration_secs: u64, now: Timestamp) -> bool {
        now.0 > self.0.saturating_add(duration_secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_boundary_is_inclusive() {
        let t = Timestamp::new(1_000);
        assert!(!t.has_expired(500, Timestamp::new(1_500)));
        assert!(t.has_expired(500, Timestamp::new(1_501)));
    }

    #[test]
    fn plus_days_is_exact_day_arithmetic() {
        let t = Timestamp::new(100);
        assert_eq!(t.plus_days(365).as_secs(), 100 + 365 * SECS_PER_DAY);
    }

    #[test]
    fn saturating_arithmetic() {
        let t = Timestamp::new(u64::MAX);
        assert_eq!(t.plus_secs(1).as_secs(), u64::MAX);
        assert_eq!(Timestamp::new(5).elapsed_since(Timestamp::new(3)), 0);
    }
}
