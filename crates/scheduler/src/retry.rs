//! Backoff policies that decide how long a failed task waits before its
//! next attempt.

use std::fmt;
use std::time::Duration;

/// Maps a zero-based retry count to the delay before that retry runs.
///
/// `attempt` is 0 for the first retry (i.e. after the first failed
/// attempt). Implementations must be pure: the scheduler may call them from
/// any thread and expects the same answer for the same input.
pub trait RetryPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

impl<F> RetryPolicy for F
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// Exponential backoff: `min(base * 2^attempt, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub const DEFAULT_BASE: Duration = Duration::from_millis(1000);
    pub const DEFAULT_MAX: Duration = Duration::from_millis(30_000);

    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_MAX)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        // 2^attempt overflows u32 past 31; anything that large is clamped anyway.
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Constant delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl RetryPolicy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

impl fmt::Display for ExponentialBackoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exponential(base={:?}, max={:?})", self.base, self.max)
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn whole_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_doubles_then_caps() {
        let policy = ExponentialBackoff::default();
        assert_eq!(policy.delay(0), Duration::from_millis(1000));
        assert_eq!(policy.delay(1), Duration::from_millis(2000));
        assert_eq!(policy.delay(2), Duration::from_millis(4000));
        assert_eq!(policy.delay(4), Duration::from_millis(16_000));
        assert_eq!(policy.delay(5), Duration::from_millis(30_000));
        assert_eq!(policy.delay(10), Duration::from_millis(30_000));
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let policy = ExponentialBackoff::default();
        assert_eq!(policy.delay(31), Duration::from_millis(30_000));
        assert_eq!(policy.delay(32), Duration::from_millis(30_000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn fixed_delay_ignores_attempt() {
        let policy = FixedDelay(Duration::from_millis(250));
        assert_eq!(policy.delay(0), Duration::from_millis(250));
        assert_eq!(policy.delay(7), Duration::from_millis(250));
    }

    #[test]
    fn closures_are_policies() {
        let linear = |attempt: u32| Duration::from_millis(100 * (u64::from(attempt) + 1));
        assert_eq!(linear.delay(0), Duration::from_millis(100));
        assert_eq!(linear.delay(2), Duration::from_millis(300));
    }

    #[test]
    fn display_names_the_bounds() {
        let shown = ExponentialBackoff::default().to_string();
        assert!(shown.contains("exponential"));
        assert!(shown.contains("30s"));
    }

    #[test]
    fn millis_saturate_instead_of_wrapping() {
        assert_eq!(whole_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(whole_millis(Duration::from_secs(u64::MAX)), u64::MAX);
        assert_eq!(whole_millis(Duration::MAX), u64::MAX);
    }
}
