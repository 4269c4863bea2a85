//! Exponential backoff schedule for retryable operations.

use std::time::Duration;

/// An exponential backoff schedule: `initial × factor^n`, capped, for a
/// bounded number of attempts.
///
/// Iterating yields the delay to sleep *before* each retry; the first
/// attempt is not delayed and not counted.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, factor: u32, cap: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            factor,
            cap,
            max_attempts,
        }
    }

    /// The delay before retry number `attempt` (1-based), or `None` once
    /// the attempts are exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = self.factor.saturating_pow(attempt - 1);
        let delay = self.initial.saturating_mul(factor);
        Some(delay.min(self.cap))
    }

    /// Iterator over the whole schedule.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=self.max_attempts).filter_map(|n| self.delay(n))
    }
}

impl Default for Backoff {
    /// 1 s initial, doubling, 60 s cap, 10 attempts.
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}
