use crosscheck_utils::memory::MemoryProbe;

const MIB: u64 = 1024 * 1024;

/// Bounds of the per-worker memory budget
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryPolicy {
    pub min_bytes: u64,
    pub max_bytes: u64,
    /// Share of each worker's slice of free memory it may use
    pub fraction: f64,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            min_bytes: 256 * MIB,
            max_bytes: 4096 * MIB,
            fraction: 0.8,
        }
    }
}

impl MemoryPolicy {
    /// `clamp(min, free / workers * fraction, max)`
    pub fn threshold(&self, free_bytes: u64, workers: usize) -> u64 {
        let per_worker = free_bytes / (workers.max(1) as u64);
        let share = (per_worker as f64 * self.fraction) as u64;
        share.clamp(self.min_bytes, self.max_bytes.max(self.min_bytes))
    }
}

/// Memory threshold owned by the pool control loop
///
/// Used both to classify abnormal exits and to recycle workers that have
/// grown past their share before they get killed.
#[derive(Debug, Clone)]
pub struct AdaptiveMemoryBudget {
    policy: MemoryPolicy,
    threshold: u64,
}

impl AdaptiveMemoryBudget {
    pub fn new(policy: MemoryPolicy) -> Self {
        Self {
            threshold: policy.max_bytes.max(policy.min_bytes),
            policy,
        }
    }

    /// Recompute from live free memory; called whenever the worker count changes
    pub fn recompute(&mut self, probe: &dyn MemoryProbe, workers: usize) -> u64 {
        let free = probe.available_bytes();
        let next = self.policy.threshold(free, workers);
        if next != self.threshold {
            tracing::debug!(
                free_mib = free / MIB,
                workers,
                threshold_mib = next / MIB,
                "Adjusted worker memory budget"
            );
        }
        self.threshold = next;
        next
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn exceeded(&self, bytes: u64) -> bool {
        bytes > self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosscheck_utils::memory::FixedMemory;
    use proptest::prelude::*;

    #[test]
    fn test_threshold_scales_with_free_memory() {
        let policy = MemoryPolicy::default();
        // 8 GiB over 4 workers = 2 GiB each, 80% of that
        assert_eq!(policy.threshold(8192 * MIB, 4), 2048 * MIB * 4 / 5);
        assert_eq!(policy.threshold(0, 4), policy.min_bytes);
        assert_eq!(policy.threshold(u64::MAX, 1), policy.max_bytes);
    }

    #[test]
    fn test_recompute_uses_probe() {
        let mut budget = AdaptiveMemoryBudget::new(MemoryPolicy::default());
        budget.recompute(&FixedMemory(1024 * MIB), 2);
        assert_eq!(budget.threshold(), 512 * MIB * 4 / 5);
        assert!(budget.exceeded(500 * MIB));
        assert!(!budget.exceeded(300 * MIB));
    }

    proptest! {
        #[test]
        fn prop_threshold_is_clamped_and_monotonic(
            free_a in 0u64..(64 * 1024 * MIB),
            free_b in 0u64..(64 * 1024 * MIB),
            workers in 1usize..64,
        ) {
            let policy = MemoryPolicy::default();
            let (low, high) = if free_a <= free_b { (free_a, free_b) } else { (free_b, free_a) };
            let at_low = policy.threshold(low, workers);
            let at_high = policy.threshold(high, workers);
            prop_assert!(at_low <= at_high);
            prop_assert!(at_low >= policy.min_bytes && at_low <= policy.max_bytes);
            prop_assert!(at_high >= policy.min_bytes && at_high <= policy.max_bytes);
            // More workers sharing the same memory never raises the budget
            prop_assert!(policy.threshold(high, workers + 1) <= at_high);
        }
    }
}
