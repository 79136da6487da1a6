use std::time::Duration;

/// Reconnect schedule: exponential from `base`, capped at `cap`, abandoned
/// after `max_attempts` consecutive failures.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            cap: Duration::from_millis(30_000),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (zero-based), or `None` once the
    /// schedule is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.cap))
    }
}

/// Tracks consecutive failures against a [`ReconnectPolicy`]. A successful
/// open resets the counter to zero.
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Consumes one attempt and returns how long to wait before it, or
    /// `None` when the schedule is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.policy.delay_for(self.attempts);
        if delay.is_some() {
            self.attempts = self.attempts.saturating_add(1);
        }
        delay
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_one_second_and_caps_at_thirty() {
        let mut backoff = Backoff::default();
        let mut delays = Vec::new();
        while let Some(delay) = backoff.next_delay() {
            delays.push(delay.as_millis() as u64);
        }
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000, 30_000, 30_000]
        );
    }

    #[test]
    fn exhausts_after_ten_consecutive_failures() {
        let mut backoff = Backoff::default();
        for _ in 0..10 {
            assert!(backoff.next_delay().is_some());
        }
        assert!(backoff.next_delay().is_none());
        assert!(backoff.next_delay().is_none());
    }

    #[test]
    fn successful_open_resets_the_schedule() {
        let mut backoff = Backoff::default();
        for _ in 0..7 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1_000)));
    }
}
