//! Retry timing after connection failures.

use std::time::Duration;

/// Default delay between a failure and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Retry delay schedule. Retries are unbounded; only the spacing is governed here.
///
/// `initial` is a floor: no retry ever comes sooner. With `max == initial` the
/// delay is fixed; otherwise it doubles per consecutive failure up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    initial: Duration,
    max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
        }
    }

    /// Capped exponential backoff. A cap below `initial` is raised to `initial`.
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before the retry following the `consecutive_failures`-th failure (1-based).
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let doublings = consecutive_failures.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << doublings)
            .unwrap_or(self.max)
            .min(self.max)
            .max(self.initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_fixed_five_seconds() {
        let policy = ReconnectPolicy::default();
        for n in [0, 1, 2, 3, 100] {
            assert_eq!(policy.delay_for(n), Duration::from_secs(5));
        }
    }

    #[test]
    fn exponential_doubles_up_to_cap() {
        let policy = ReconnectPolicy::exponential(Duration::from_secs(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn cap_never_undercuts_floor() {
        let policy = ReconnectPolicy::exponential(Duration::from_secs(5), Duration::from_secs(1));
        assert_eq!(policy.max(), Duration::from_secs(5));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
    }
}
