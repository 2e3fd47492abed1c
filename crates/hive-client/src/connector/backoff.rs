//! Reconnect delays: exponential growth with full jitter.
//!
//! `delay = random(0, min(max, base * 2^attempt))`

use std::time::Duration;

/// Delay schedule for reconnect attempts.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Ceiling for the current attempt, before jitter.
    fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next attempt. Advances the attempt counter.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let ceiling = u64::try_from(self.ceiling().as_millis()).unwrap_or(u64::MAX);
        self.attempt = self.attempt.saturating_add(1);
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(0..=ceiling))
    }

    /// Start over after a successful reconnect.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}
