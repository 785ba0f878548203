//! Pool configuration
//!
//! `PoolConfig` is built once before the pool starts and never changes
//! afterwards. Values come from defaults, then the environment, then
//! explicit builder calls made by the CLI.

use crate::adaptive::{MemoryPolicy, TimeoutPolicy};
use crosscheck_core::{Error, Result, CROSSCHECK_TIMEOUT_VAR, CROSSCHECK_WORKERS_VAR};
use std::time::Duration;

/// Settings that shape the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker slots kept in service
    pub workers: usize,

    /// The run aborts when replacement failures leave fewer live slots than this
    pub min_workers: usize,

    /// Workers are recycled after this many completed checks
    pub max_tasks_per_worker: u64,

    /// Time a recycled or stopping worker gets to exit before it is killed
    pub grace_period: Duration,

    /// Time the whole pool gets for every worker to report ready
    pub startup_timeout: Duration,

    /// Launch attempts per slot before the slot is given up
    pub spawn_attempts: u32,

    /// Consecutive workers that may die before ever reporting ready
    pub max_startup_failures: u32,

    /// Adaptive per-task deadline
    pub timeout: TimeoutPolicy,

    /// Fixed per-task deadline that disables adaptation
    pub timeout_override: Option<Duration>,

    /// Adaptive per-worker memory budget
    pub memory: MemoryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            min_workers: 1,
            max_tasks_per_worker: 500,
            grace_period: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(30),
            spawn_attempts: 3,
            max_startup_failures: 8,
            timeout: TimeoutPolicy::default(),
            timeout_override: None,
            memory: MemoryPolicy::default(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_min_workers(mut self, min_workers: usize) -> Self {
        self.min_workers = min_workers;
        self
    }

    pub fn with_max_tasks_per_worker(mut self, max_tasks: u64) -> Self {
        self.max_tasks_per_worker = max_tasks;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_startup_timeout(mut self, startup_timeout: Duration) -> Self {
        self.startup_timeout = startup_timeout;
        self
    }

    pub fn with_timeout_override(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout = policy;
        self
    }

    pub fn with_memory_policy(mut self, policy: MemoryPolicy) -> Self {
        self.memory = policy;
        self
    }

    /// Apply `CROSSCHECK_WORKERS` and `CROSSCHECK_TIMEOUT_SECS` when set
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup(CROSSCHECK_WORKERS_VAR) {
            self.workers = value.trim().parse().map_err(|_| {
                Error::configuration(format!("{CROSSCHECK_WORKERS_VAR} must be a number, got '{value}'"))
            })?;
        }
        if let Some(value) = lookup(CROSSCHECK_TIMEOUT_VAR) {
            let secs: f64 = value.trim().parse().map_err(|_| {
                Error::configuration(format!("{CROSSCHECK_TIMEOUT_VAR} must be seconds, got '{value}'"))
            })?;
            self.timeout_override = Some(parse_timeout(secs)?);
        }
        Ok(self)
    }

    /// Reject settings the pool cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::configuration("worker count must be at least 1"));
        }
        if self.min_workers == 0 || self.min_workers > self.workers {
            return Err(Error::configuration(format!(
                "minimum worker count must be between 1 and {}, got {}",
                self.workers, self.min_workers
            )));
        }
        if self.max_tasks_per_worker == 0 {
            return Err(Error::configuration("max tasks per worker must be at least 1"));
        }
        if self.spawn_attempts == 0 {
            return Err(Error::configuration("spawn attempts must be at least 1"));
        }
        if matches!(self.timeout_override, Some(t) if t.is_zero()) {
            return Err(Error::configuration("task timeout must be positive"));
        }
        Ok(())
    }
}

/// Convert a seconds value from the command line or environment
pub fn parse_timeout(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(Error::configuration(format!(
            "task timeout must be a positive number of seconds, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| Error::configuration(format!("task timeout out of range: {e}")))
}
