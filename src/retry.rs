//! Exponential backoff shared by every retry point of the connection state machine.

use embassy_time::{Duration, Instant};

/// Backoff parameters for one retry point.
///
/// The wait before attempt `n` is `min(base * 2^n, cap)`. `max_attempts`
/// bounds how many attempts the point may make before the state machine gives
/// up and restarts the whole connection; `None` retries forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Creates an unbounded policy.
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            max_attempts: None,
        }
    }

    /// A policy whose delay never grows.
    pub const fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay)
    }

    /// Limits the number of attempts before escalation.
    pub const fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Returns `min(base * 2^attempt, cap)`, saturating instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        let cap = self.cap.as_millis();
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = self.base.as_millis().saturating_mul(factor).min(cap);
        Duration::from_millis(millis)
    }

    /// True once `attempts` has gone past the configured maximum.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts > max)
    }
}

/// Attempt counter and next-retry deadline of a single retry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    next_attempt: Option<Instant>,
}

impl RetryState {
    pub const fn new() -> Self {
        Self {
            attempts: 0,
            next_attempt: None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_first(&self) -> bool {
        self.attempts == 0
    }

    /// The point may act now: nothing is scheduled or the deadline has passed.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.next_attempt {
            Some(deadline) => now >= deadline,
            None => true,
        }
    }

    /// Counts one more attempt and arms the deadline `policy.delay(attempts)` from now,
    /// using the already incremented count. Returns the scheduled delay.
    pub fn record_failure(&mut self, now: Instant, policy: &RetryPolicy) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.arm(now, policy.delay(self.attempts))
    }

    /// Arms the deadline from the current count and then counts the attempt.
    pub fn record_attempt(&mut self, now: Instant, policy: &RetryPolicy) -> Duration {
        let delay = policy.delay(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        self.arm(now, delay)
    }

    /// Moves the deadline without touching the attempt count.
    pub fn defer(&mut self, now: Instant, delay: Duration) {
        self.arm(now, delay);
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn arm(&mut self, now: Instant, delay: Duration) -> Duration {
        self.next_attempt = Some(now + delay);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base: u64, cap: u64) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(base), Duration::from_millis(cap))
    }

    #[test]
    fn delay_doubles_until_cap() {
        let p = policy(250, 8000);
        let delays: [u64; 8] = core::array::from_fn(|n| p.delay(n as u32).as_millis());
        assert_eq!(delays, [250, 500, 1000, 2000, 4000, 8000, 8000, 8000]);
    }

    #[test]
    fn delay_is_non_decreasing_and_saturates() {
        let p = policy(1000, 32_000);
        let mut last = Duration::from_millis(0);
        for n in 0..200 {
            let d = p.delay(n);
            assert!(d >= last);
            assert!(d <= p.cap);
            last = d;
        }
        assert_eq!(p.delay(u32::MAX), p.cap);
    }

    #[test]
    fn three_broker_failures_schedule_expected_delays() {
        let p = policy(250, 8000);
        let mut state = RetryState::new();
        let now = Instant::from_millis(0);
        let delays = [
            state.record_failure(now, &p).as_millis(),
            state.record_failure(now, &p).as_millis(),
            state.record_failure(now, &p).as_millis(),
        ];
        assert_eq!(delays, [500, 1000, 2000]);
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn due_after_deadline_only() {
        let p = policy(100, 100);
        let mut state = RetryState::new();
        assert!(state.is_due(Instant::from_millis(5)));
        state.record_attempt(Instant::from_millis(0), &p);
        assert!(!state.is_due(Instant::from_millis(99)));
        assert!(state.is_due(Instant::from_millis(100)));
        state.reset();
        assert!(state.is_first());
    }

    #[test]
    fn exhausted_only_past_max() {
        let p = policy(1, 1).with_max_attempts(3);
        assert!(!p.exhausted(3));
        assert!(p.exhausted(4));
        assert!(!policy(1, 1).exhausted(u32::MAX));
    }
}
