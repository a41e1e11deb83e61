//! Bounded exponential backoff.

use std::time::Duration;

/// Retry schedule: `initial * 2^attempt`, capped at `max`, for at most
/// `max_attempts` tries in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl Backoff {
    /// Creates a schedule.
    #[must_use]
    pub const fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            max_attempts,
        }
    }

    /// Delay before retry `attempt` (0 is the first retry).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }

    /// Returns true if another attempt is allowed after `attempts` tries.
    #[must_use]
    pub const fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn doubles_then_caps() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000), 6);
        let delays: Vec<u128> = (0..6).map(|a| backoff.delay(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(40), backoff.max);
    }

    #[test]
    fn attempt_budget() {
        let backoff = Backoff::new(Duration::ZERO, Duration::ZERO, 3);
        assert!(backoff.allows(2));
        assert!(!backoff.allows(3));
    }
}
