//! Per-task results and their aggregation over a run

use crate::compare::Comparison;
use crosscheck_cache::CacheEntry;
use crosscheck_core::{FailureKind, Task};
use crosscheck_pool::PoolHealth;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::time::Duration;

/// Final verdict for one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Passed,
    /// Oracle and candidate disagree
    Failed(Comparison),
    Crashed { kind: FailureKind, detail: String },
    TimedOut { after: Duration },
    Skipped(String),
}

impl TaskOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        TaskOutcome::Skipped(reason.into())
    }

    /// Short label used in logs and reports
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Passed => "PASS",
            TaskOutcome::Failed(_) => "FAIL",
            TaskOutcome::Crashed {
                kind: FailureKind::Oom,
                ..
            } => "OOM",
            TaskOutcome::Crashed {
                kind: FailureKind::Unknown,
                ..
            } => "UNKNOWN",
            TaskOutcome::Crashed { .. } => "CRASH",
            TaskOutcome::TimedOut { .. } => "TIMEOUT",
            TaskOutcome::Skipped(_) => "SKIP",
        }
    }
}

impl Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Passed => write!(f, "passed"),
            TaskOutcome::Failed(comparison) => write!(
                f,
                "mismatch (missing {:?}, extra {:?})",
                comparison.missing, comparison.extra
            ),
            TaskOutcome::Crashed { kind, detail } => write!(f, "{kind}: {detail}"),
            TaskOutcome::TimedOut { after } => {
                write!(f, "timed out after {:.1}s", after.as_secs_f64())
            }
            TaskOutcome::Skipped(reason) => write!(f, "skipped ({reason})"),
        }
    }
}

/// Where the oracle codes for a task came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheUse {
    Hit,
    /// The oracle was invoked
    Miss,
    /// The task never got as far as the oracle
    NotConsulted,
}

/// Everything the run loop needs to know about one finished task
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: Task,
    pub outcome: TaskOutcome,
    pub cache: CacheUse,
    /// Oracle result to write back into the cache
    pub fresh_entry: Option<CacheEntry>,
    pub duration: Duration,
}

impl TaskReport {
    pub fn new(task: Task, outcome: TaskOutcome) -> Self {
        Self {
            task,
            outcome,
            cache: CacheUse::NotConsulted,
            fresh_entry: None,
            duration: Duration::ZERO,
        }
    }
}

/// Totals for one category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub crashed: u64,
    pub timed_out: u64,
    pub skipped: u64,
}

/// Aggregated results of a run, folded in task-completion order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub crashed: u64,
    pub oom: u64,
    pub timed_out: u64,
    pub unknown: u64,
    pub skipped: u64,
    pub categories: BTreeMap<String, CategoryStats>,
    /// Summed over all mismatching tasks
    pub missing: BTreeMap<u32, u64>,
    pub extra: BTreeMap<u32, u64>,
    pub health: PoolHealth,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub oracle_invocations: u64,
    /// Oracle results persisted back into the cache
    pub cache_written: u64,
    pub elapsed: Duration,
    pub crashed_tasks: Vec<String>,
    pub timed_out_tasks: Vec<String>,
}

impl RunStats {
    pub fn record(&mut self, report: &TaskReport) {
        self.total += 1;
        let category = self
            .categories
            .entry(report.task.category.clone())
            .or_default();
        category.total += 1;

        match report.cache {
            CacheUse::Hit => self.cache_hits += 1,
            CacheUse::Miss => {
                self.cache_misses += 1;
                self.oracle_invocations += 1;
            }
            CacheUse::NotConsulted => {}
        }

        match &report.outcome {
            TaskOutcome::Passed => {
                self.passed += 1;
                category.passed += 1;
            }
            TaskOutcome::Failed(comparison) => {
                self.failed += 1;
                category.failed += 1;
                for (code, count) in &comparison.missing {
                    *self.missing.entry(*code).or_insert(0) += u64::from(*count);
                }
                for (code, count) in &comparison.extra {
                    *self.extra.entry(*code).or_insert(0) += u64::from(*count);
                }
            }
            TaskOutcome::Crashed { kind, .. } => {
                match kind {
                    FailureKind::Crash => self.crashed += 1,
                    FailureKind::Oom => self.oom += 1,
                    FailureKind::Unknown => self.unknown += 1,
                }
                category.crashed += 1;
                self.crashed_tasks.push(report.task.relative_path.clone());
            }
            TaskOutcome::TimedOut { .. } => {
                self.timed_out += 1;
                category.timed_out += 1;
                self.timed_out_tasks.push(report.task.relative_path.clone());
            }
            TaskOutcome::Skipped(_) => {
                self.skipped += 1;
                category.skipped += 1;
            }
        }
    }

    /// Tasks that produced a verdict
    pub fn evaluated(&self) -> u64 {
        self.total - self.skipped
    }

    pub fn pass_rate(&self) -> f64 {
        match self.evaluated() {
            0 => 0.0,
            evaluated => self.passed as f64 * 100.0 / evaluated as f64,
        }
    }

    /// True when no evaluated task mismatched, crashed or timed out
    pub fn all_matched(&self) -> bool {
        self.failed + self.crashed + self.oom + self.timed_out + self.unknown == 0
    }

    /// Codes with the most mismatches as `(code, missing, extra)`
    pub fn top_mismatches(&self, limit: usize) -> Vec<(u32, u64, u64)> {
        let mut codes: BTreeMap<u32, (u64, u64)> = BTreeMap::new();
        for (code, count) in &self.missing {
            codes.entry(*code).or_default().0 += count;
        }
        for (code, count) in &self.extra {
            codes.entry(*code).or_default().1 += count;
        }
        let mut ranked: Vec<(u32, u64, u64)> = codes
            .into_iter()
            .map(|(code, (missing, extra))| (code, missing, extra))
            .collect();
        ranked.sort_by(|a, b| (b.1 + b.2).cmp(&(a.1 + a.2)).then(a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::compare;
    use crosscheck_core::TaskId;

    fn report(category: &str, outcome: TaskOutcome) -> TaskReport {
        let path = format!("{category}/x.ts");
        TaskReport::new(Task::new(TaskId(0), &path, category, &path), outcome)
    }

    #[test]
    fn test_record_counts_each_outcome() {
        let mut stats = RunStats::default();
        stats.record(&report("a", TaskOutcome::Passed));
        stats.record(&report("a", TaskOutcome::Failed(compare(&[1, 2], &[2, 3]))));
        stats.record(&report(
            "b",
            TaskOutcome::Crashed {
                kind: FailureKind::Oom,
                detail: "killed".into(),
            },
        ));
        stats.record(&report(
            "b",
            TaskOutcome::TimedOut {
                after: Duration::from_secs(5),
            },
        ));
        stats.record(&report("b", TaskOutcome::skipped("non-UTF-8 encoding")));

        assert_eq!(stats.total, 5);
        assert_eq!((stats.passed, stats.failed, stats.oom), (1, 1, 1));
        assert_eq!((stats.timed_out, stats.skipped, stats.crashed), (1, 1, 0));
        assert_eq!(stats.evaluated(), 4);
        assert_eq!(stats.categories["a"].total, 2);
        assert_eq!(stats.categories["b"].crashed, 1);
        assert_eq!(stats.missing, BTreeMap::from([(1, 1)]));
        assert_eq!(stats.extra, BTreeMap::from([(3, 1)]));
        assert_eq!(stats.crashed_tasks, vec!["b/x.ts"]);
        assert_eq!(stats.timed_out_tasks, vec!["b/x.ts"]);
        assert!(!stats.all_matched());
    }

    #[test]
    fn test_skips_do_not_fail_the_run() {
        let mut stats = RunStats::default();
        stats.record(&report("a", TaskOutcome::Passed));
        stats.record(&report("a", TaskOutcome::skipped("oracle crashed")));
        assert!(stats.all_matched());
        assert_eq!(stats.pass_rate(), 100.0);
    }

    #[test]
    fn test_top_mismatches_ranked_by_total() {
        let mut stats = RunStats::default();
        stats.missing = BTreeMap::from([(10, 1), (20, 5)]);
        stats.extra = BTreeMap::from([(10, 1), (30, 2)]);
        assert_eq!(
            stats.top_mismatches(2),
            vec![(20, 5, 0), (10, 1, 1)]
        );
    }
}
