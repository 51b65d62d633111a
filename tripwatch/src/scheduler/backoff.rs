//! Failure backoff for the poll loop.

use std::time::Duration;

/// Delay unit doubled per consecutive failure.
pub const BACKOFF_UNIT: Duration = Duration::from_millis(1000);

/// Upper bound on any backoff delay.
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_millis(30_000);

/// The failure counter stops growing here.
pub const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Exponential backoff over consecutive failed cycles.
///
/// The delay after the n-th consecutive failure is
/// `min(MAX_BACKOFF_DELAY, BACKOFF_UNIT * 2^n)` with n capped at
/// [`MAX_BACKOFF_EXPONENT`]: 2s, 4s, 8s, 16s, 30s, 30s, ...
/// A single success resets the counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backoff {
    failures: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a failure and returns the delay before the next attempt.
    pub fn record_failure(&mut self) -> Duration {
        self.failures = (self.failures + 1).min(MAX_BACKOFF_EXPONENT);
        Self::delay_for(self.failures)
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures so far, capped at [`MAX_BACKOFF_EXPONENT`].
    pub fn failures(&self) -> u32 {
        self.failures
    }

    fn delay_for(failures: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(failures);
        BACKOFF_UNIT
            .saturating_mul(multiplier)
            .min(MAX_BACKOFF_DELAY)
    }
}
