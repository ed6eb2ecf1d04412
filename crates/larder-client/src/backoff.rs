use std::time::Duration;

/// Reconnect delay policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Policy {
    /// Grows by `factor` on each consecutive failure, bounded by `cap`.
    Exponential {
        base: Duration,
        factor: f64,
        cap: Duration,
    },
    /// Constant delay between attempts.
    Fixed(Duration),
}

impl Policy {
    /// The foreground page path: quick first retry, eases off under
    /// sustained failure.
    pub fn foreground() -> Self {
        Policy::Exponential {
            base: Duration::from_secs(1),
            factor: 1.5,
            cap: Duration::from_secs(30),
        }
    }

    /// The background worker path retries on a fixed cadence.
    pub fn background() -> Self {
        Policy::Fixed(Duration::from_secs(5))
    }
}

/// Tracks the delay for the next reconnect attempt.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: Policy,
    next: Duration,
}

impl Backoff {
    pub fn new(policy: Policy) -> Self {
        let next = match policy {
            Policy::Exponential { base, .. } => base,
            Policy::Fixed(delay) => delay,
        };
        Self { policy, next }
    }

    /// Delay to wait before the next attempt. Non-decreasing across
    /// consecutive failures, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        match self.policy {
            Policy::Fixed(delay) => delay,
            Policy::Exponential { factor, cap, .. } => {
                let current = self.next;
                self.next = self.next.mul_f64(factor).min(cap);
                current
            }
        }
    }

    /// A successful connect returns the delay to its base value.
    pub fn reset(&mut self) {
        if let Policy::Exponential { base, .. } = self.policy {
            self.next = base;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_is_nondecreasing_and_capped() {
        let mut backoff = Backoff::new(Policy::foreground());
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay >= last, "delay regressed: {delay:?} < {last:?}");
            assert!(delay <= Duration::from_secs(30));
            last = delay;
        }
        assert_eq!(last, Duration::from_secs(30));
    }

    #[test]
    fn exponential_growth_factor() {
        let mut backoff = Backoff::new(Policy::Exponential {
            base: Duration::from_secs(1),
            factor: 1.5,
            cap: Duration::from_secs(30),
        });
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2250));
    }

    #[test]
    fn reset_returns_to_base() {
        let mut backoff = Backoff::new(Policy::foreground());
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn fixed_never_grows() {
        let mut backoff = Backoff::new(Policy::background());
        for _ in 0..10 {
            assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }
}
