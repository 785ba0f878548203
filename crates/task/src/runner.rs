//! The run orchestrator
//!
//! Streams tasks from a [`TaskSource`] through the oracle (or the result
//! cache) and the worker pool, keeping at most `workers` tasks in flight, and
//! folds every [`TaskReport`] into [`RunStats`] in one consuming loop.

use crate::compare::compare;
use crate::fixture::{FixtureParser, Prepared, SingleFileParser};
use crate::source::TaskSource;
use crate::stats::{CacheUse, RunStats, TaskOutcome, TaskReport};
use crosscheck_cache::{content_hash, CacheEntry, CacheFile, CacheWriter, LoadOutcome, ResultCache};
use crosscheck_core::{
    CandidateOutcome, Oracle, Result, Task, CROSSCHECK_CACHE_FILE_VAR,
    CROSSCHECK_FRESHNESS_KEY_VAR, UNKNOWN_FRESHNESS_KEY,
};
use crosscheck_pool::{PoolConfig, WorkerLauncher, WorkerPool};
use crosscheck_utils::memory::{MemoryProbe, SystemMemory};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

pub const SKIP_NON_UTF8: &str = "non-UTF-8 encoding";
pub const SKIP_ORACLE_CRASHED: &str = "oracle crashed";

/// Run-level settings outside the pool
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Tasks in flight at once; normally the pool size
    pub concurrency: usize,
    pub cache_path: Option<PathBuf>,
    /// Identifies the oracle's behaviour; cache entries from another key are ignored
    pub freshness_key: String,
    /// Persist fresh oracle results at the end of the run
    pub write_back_cache: bool,
    /// Only log mismatches where either side reported this code
    pub error_code: Option<u32>,
    /// Log both code lists for every mismatch
    pub print_test: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            cache_path: None,
            freshness_key: UNKNOWN_FRESHNESS_KEY.to_string(),
            write_back_cache: false,
            error_code: None,
            print_test: false,
        }
    }
}

impl RunConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_freshness_key(mut self, key: impl Into<String>) -> Self {
        self.freshness_key = key.into();
        self
    }

    pub fn with_write_back(mut self, write_back: bool) -> Self {
        self.write_back_cache = write_back;
        self
    }

    pub fn with_error_code(mut self, code: Option<u32>) -> Self {
        self.error_code = code;
        self
    }

    pub fn with_print_test(mut self, print_test: bool) -> Self {
        self.print_test = print_test;
        self
    }

    /// Whether a finished task gets a log line; the code filter only narrows mismatches
    pub fn reports(&self, outcome: &TaskOutcome) -> bool {
        match (outcome, self.error_code) {
            (TaskOutcome::Failed(comparison), Some(code)) => comparison.involves(code),
            _ => true,
        }
    }

    /// Apply `CROSSCHECK_CACHE_FILE` and `CROSSCHECK_FRESHNESS_KEY` when set
    pub fn apply_env(mut self) -> Self {
        if let Ok(path) = std::env::var(CROSSCHECK_CACHE_FILE_VAR) {
            if !path.is_empty() {
                self.cache_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(key) = std::env::var(CROSSCHECK_FRESHNESS_KEY_VAR) {
            if !key.is_empty() {
                self.freshness_key = key;
            }
        }
        self
    }
}

pub struct Runner {
    config: RunConfig,
    pool_config: PoolConfig,
    oracle: Arc<dyn Oracle>,
    launcher: Arc<dyn WorkerLauncher>,
    probe: Arc<dyn MemoryProbe>,
    parser: Arc<dyn FixtureParser>,
}

impl Runner {
    pub fn new(
        config: RunConfig,
        pool_config: PoolConfig,
        oracle: Arc<dyn Oracle>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        Self {
            config,
            pool_config,
            oracle,
            launcher,
            probe: Arc::new(SystemMemory::new()),
            parser: Arc::new(SingleFileParser),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn FixtureParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Evaluate every task the source yields
    ///
    /// Only a pool that cannot keep workers alive ends the run with an error;
    /// every per-task problem lands in the returned statistics.
    pub async fn run(&self, source: &TaskSource) -> Result<RunStats> {
        let started = Instant::now();
        let store = self.config.cache_path.as_ref().map(ResultCache::new);
        let cache = store.as_ref().and_then(|store| {
            match store.load(&self.config.freshness_key) {
                LoadOutcome::Loaded(file) => Some(file),
                other => {
                    tracing::info!(outcome = %other, "Running without cached oracle results");
                    None
                }
            }
        });

        let pool = WorkerPool::start(
            self.pool_config.clone(),
            Arc::clone(&self.launcher),
            Arc::clone(&self.probe),
        )
        .await?;

        let mut stats = RunStats::default();
        let mut writer = CacheWriter::new(cache.as_ref());
        let mut fatal = None;
        {
            let mut reports = stream::iter(source.iter())
                .map(|task| {
                    let span = crosscheck_utils::tracing::task_span(&task.relative_path, &task.category);
                    self.process(task, &pool, cache.as_ref()).instrument(span)
                })
                .buffer_unordered(self.config.concurrency.max(1));

            while let Some(result) = reports.next().await {
                match result {
                    Ok(report) => {
                        if let Some(entry) = &report.fresh_entry {
                            writer.record(report.task.cache_key(), entry.clone());
                        }
                        log_report(&report, &self.config);
                        stats.record(&report);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Aborting run");
                        fatal = Some(e);
                        break;
                    }
                }
            }
        }

        match pool.shutdown().await {
            Ok(health) => stats.health.merge(&health),
            Err(e) => tracing::warn!(error = %e, "Worker pool was already closed"),
        }
        if let Some(e) = fatal {
            return Err(e);
        }

        if let (Some(store), true) = (&store, self.config.write_back_cache) {
            let written = writer.persist(store, &self.config.freshness_key)?;
            stats.cache_written = written as u64;
        }
        stats.elapsed = started.elapsed();
        Ok(stats)
    }

    async fn process(
        &self,
        task: Task,
        pool: &WorkerPool,
        cache: Option<&CacheFile>,
    ) -> Result<TaskReport> {
        let started = Instant::now();

        let bytes = match tokio::fs::read(task.fixture_path()).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let reason = format!("unreadable fixture: {e}");
                return Ok(TaskReport::new(task, TaskOutcome::Skipped(reason)));
            }
        };
        let Ok(content) = std::str::from_utf8(&bytes) else {
            return Ok(TaskReport::new(task, TaskOutcome::skipped(SKIP_NON_UTF8)));
        };
        let (fragments, configuration) = match self.parser.prepare(&task, content) {
            Prepared::Ready {
                fragments,
                configuration,
            } => (fragments, configuration),
            Prepared::Skip(reason) => return Ok(TaskReport::new(task, TaskOutcome::Skipped(reason))),
        };

        let cached = cache.and_then(|cache| cache.lookup(&task, &bytes));
        if cache.is_some() {
            crosscheck_utils::tracing::cache_event(&task.relative_path, cached.is_some());
        }
        let (oracle_codes, cache_use, fresh_entry) =
            match cached {
                Some(entry) if entry.is_crash() => {
                    let mut report =
                        TaskReport::new(task, TaskOutcome::skipped(SKIP_ORACLE_CRASHED));
                    report.cache = CacheUse::Hit;
                    return Ok(report);
                }
                Some(entry) => (entry.codes.clone(), CacheUse::Hit, None),
                None => {
                    let hash = content_hash(&bytes);
                    match run_oracle(&self.oracle, &fragments, &configuration).await {
                        Ok(codes) => {
                            let entry = CacheEntry::new(codes.clone(), hash);
                            (codes, CacheUse::Miss, Some(entry))
                        }
                        Err(detail) => {
                            tracing::warn!(task = %task, %detail, "Oracle failed");
                            let mut report =
                                TaskReport::new(task, TaskOutcome::skipped(SKIP_ORACLE_CRASHED));
                            report.cache = CacheUse::Miss;
                            report.fresh_entry = Some(CacheEntry::oracle_crash(hash, detail));
                            return Ok(report);
                        }
                    }
                }
            };

        let outcome = match pool.dispatch(task.clone(), fragments, configuration).await? {
            CandidateOutcome::Completed { codes, .. } => {
                let comparison = compare(&oracle_codes, &codes);
                if comparison.exact_match {
                    TaskOutcome::Passed
                } else {
                    TaskOutcome::Failed(comparison)
                }
            }
            CandidateOutcome::Crashed { kind, detail } => TaskOutcome::Crashed { kind, detail },
            CandidateOutcome::TimedOut { after } => TaskOutcome::TimedOut { after },
        };

        Ok(TaskReport {
            task,
            outcome,
            cache: cache_use,
            fresh_entry,
            duration: started.elapsed(),
        })
    }
}

/// Run the oracle on the blocking pool; a failure comes back as its detail
pub(crate) async fn run_oracle(
    oracle: &Arc<dyn Oracle>,
    fragments: &[crosscheck_core::SourceFragment],
    configuration: &crosscheck_core::Configuration,
) -> std::result::Result<Vec<u32>, String> {
    let oracle = Arc::clone(oracle);
    let fragments = fragments.to_vec();
    let configuration = configuration.clone();
    match tokio::task::spawn_blocking(move || oracle.check(&fragments, &configuration)).await {
        Ok(Ok(codes)) => Ok(codes),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("oracle panicked: {e}")),
    }
}

fn log_report(report: &TaskReport, config: &RunConfig) {
    if !config.reports(&report.outcome) {
        return;
    }
    let task = &report.task.relative_path;
    let duration_ms = report.duration.as_millis() as u64;
    match &report.outcome {
        TaskOutcome::Passed => tracing::debug!(%task, duration_ms, "PASS"),
        TaskOutcome::Skipped(reason) => tracing::debug!(%task, %reason, "SKIP"),
        outcome @ TaskOutcome::Failed(comparison) if config.print_test => tracing::info!(
            %task,
            duration_ms,
            expected = ?comparison.expected,
            actual = ?comparison.actual,
            outcome = %outcome,
            "FAIL"
        ),
        outcome => tracing::info!(%task, duration_ms, outcome = %outcome, "{}", outcome.label()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_filter_narrows_mismatches_only() {
        let config = RunConfig::default().with_error_code(Some(2322));
        assert!(config.reports(&TaskOutcome::Failed(compare(&[2322], &[]))));
        assert!(config.reports(&TaskOutcome::Failed(compare(&[1005], &[2322, 1005]))));
        assert!(!config.reports(&TaskOutcome::Failed(compare(&[1005], &[]))));
        assert!(config.reports(&TaskOutcome::Passed));
        assert!(config.reports(&TaskOutcome::Crashed {
            kind: crosscheck_core::FailureKind::Crash,
            detail: "exit 1".to_string(),
        }));
    }

    #[test]
    fn test_no_error_code_reports_everything() {
        let config = RunConfig::default();
        assert!(config.reports(&TaskOutcome::Failed(compare(&[1005], &[]))));
        assert!(!config.print_test);
    }
}
