use std::time::Duration;

/// Parameters of the adaptive per-task deadline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutPolicy {
    /// Deadline used until enough samples have been seen
    pub initial: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Deadline is this many times the average task duration
    pub multiplier: f64,
    pub warmup_samples: u64,
    /// Recompute after this many further samples, not after every completion
    pub recompute_every: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(20),
            min: Duration::from_secs(5),
            max: Duration::from_secs(60),
            multiplier: 5.0,
            warmup_samples: 10,
            recompute_every: 50,
        }
    }
}

impl TimeoutPolicy {
    fn clamp(&self, value: Duration) -> Duration {
        value.clamp(self.min, self.max)
    }
}

/// Rolling-average deadline owned by the pool control loop
#[derive(Debug, Clone)]
pub struct AdaptiveTimeout {
    policy: TimeoutPolicy,
    sum: Duration,
    count: u64,
    current: Duration,
    pinned: bool,
}

impl AdaptiveTimeout {
    pub fn new(policy: TimeoutPolicy) -> Self {
        let policy = TimeoutPolicy {
            min: policy.min.min(policy.max),
            recompute_every: policy.recompute_every.max(1),
            ..policy
        };
        Self {
            current: policy.clamp(policy.initial),
            policy,
            sum: Duration::ZERO,
            count: 0,
            pinned: false,
        }
    }

    /// A deadline that never adapts, used when the caller overrides it
    pub fn pinned(policy: TimeoutPolicy, value: Duration) -> Self {
        let mut timeout = Self::new(policy);
        timeout.current = value;
        timeout.pinned = true;
        timeout
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Add one completed task duration; returns the new deadline when it changed
    pub fn record(&mut self, duration: Duration) -> Option<Duration> {
        self.sum = self.sum.saturating_add(duration);
        self.count += 1;

        if self.pinned || !self.due_for_recompute() {
            return None;
        }

        let average = self.sum.as_secs_f64() / self.count as f64;
        let scaled = Duration::try_from_secs_f64(average * self.policy.multiplier)
            .unwrap_or(self.policy.max);
        let next = self.policy.clamp(scaled);
        if next == self.current {
            return None;
        }
        tracing::debug!(
            previous_ms = self.current.as_millis() as u64,
            next_ms = next.as_millis() as u64,
            samples = self.count,
            "Adjusted task timeout"
        );
        self.current = next;
        Some(next)
    }

    fn due_for_recompute(&self) -> bool {
        let warmup = self.policy.warmup_samples;
        if self.count < warmup {
            return false;
        }
        (self.count - warmup) % self.policy.recompute_every == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn test_initial_value_during_warmup() {
        let mut timeout = AdaptiveTimeout::new(TimeoutPolicy::default());
        for _ in 0..9 {
            assert_eq!(timeout.record(ms(10)), None);
            assert_eq!(timeout.current(), Duration::from_secs(20));
        }
    }

    #[test]
    fn test_recomputes_at_warmup_then_in_batches() {
        let mut timeout = AdaptiveTimeout::new(TimeoutPolicy::default());
        for _ in 0..10 {
            timeout.record(Duration::from_secs(2));
        }
        // 2s average * 5 = 10s
        assert_eq!(timeout.current(), Duration::from_secs(10));

        // Slower tasks do not move the deadline until the next batch boundary
        for _ in 0..49 {
            timeout.record(Duration::from_secs(8));
        }
        assert_eq!(timeout.current(), Duration::from_secs(10));
        timeout.record(Duration::from_secs(8));
        assert_eq!(timeout.current(), Duration::from_secs(35));
    }

    #[test]
    fn test_clamps_to_bounds() {
        let mut fast = AdaptiveTimeout::new(TimeoutPolicy::default());
        for _ in 0..10 {
            fast.record(ms(1));
        }
        assert_eq!(fast.current(), Duration::from_secs(5));

        let mut slow = AdaptiveTimeout::new(TimeoutPolicy::default());
        for _ in 0..10 {
            slow.record(Duration::from_secs(100));
        }
        assert_eq!(slow.current(), Duration::from_secs(60));
    }

    #[test]
    fn test_pinned_never_moves() {
        let mut timeout = AdaptiveTimeout::pinned(TimeoutPolicy::default(), ms(250));
        for _ in 0..200 {
            assert_eq!(timeout.record(Duration::from_secs(30)), None);
        }
        assert_eq!(timeout.current(), ms(250));
    }

    proptest! {
        #[test]
        fn prop_timeout_stays_within_bounds(samples in prop::collection::vec(0u64..600_000, 0..300)) {
            let policy = TimeoutPolicy::default();
            let mut timeout = AdaptiveTimeout::new(policy);
            for (index, sample) in samples.iter().enumerate() {
                timeout.record(ms(*sample));
                let current = timeout.current();
                prop_assert!(current >= policy.min && current <= policy.max);
                if (index as u64 + 1) < policy.warmup_samples {
                    prop_assert_eq!(current, policy.initial);
                }
            }
        }
    }
}
