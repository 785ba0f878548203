//! Cache generation pass: run the oracle over every fixture and save the results

use crate::fixture::{FixtureParser, Prepared};
use crate::runner::run_oracle;
use crate::source::TaskSource;
use crosscheck_cache::{content_hash, CacheEntry, ResultCache};
use crosscheck_core::{Oracle, Result, Task};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const PROGRESS_EVERY: u64 = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerateSummary {
    pub processed: u64,
    pub recorded: u64,
    pub oracle_crashes: u64,
    /// Fixtures that could not be read or prepared
    pub skipped: u64,
    pub elapsed: Duration,
}

enum Generated {
    Entry(String, CacheEntry),
    Skipped,
}

/// Invoke the oracle for every task and replace the cache file with the results
pub async fn generate_cache(
    source: &TaskSource,
    oracle: Arc<dyn Oracle>,
    parser: &dyn FixtureParser,
    concurrency: usize,
    store: &ResultCache,
    freshness_key: &str,
) -> Result<GenerateSummary> {
    let started = Instant::now();
    let mut summary = GenerateSummary::default();
    let mut entries = BTreeMap::new();

    let mut results = stream::iter(source.iter())
        .map(|task| generate_one(task, &oracle, parser))
        .buffer_unordered(concurrency.max(1));

    while let Some(generated) = results.next().await {
        summary.processed += 1;
        match generated {
            Generated::Entry(key, entry) => {
                if entry.is_crash() {
                    summary.oracle_crashes += 1;
                }
                summary.recorded += 1;
                entries.insert(key, entry);
            }
            Generated::Skipped => summary.skipped += 1,
        }
        if summary.processed % PROGRESS_EVERY == 0 {
            tracing::info!(
                processed = summary.processed,
                oracle_crashes = summary.oracle_crashes,
                "Generating cache"
            );
        }
    }
    drop(results);

    store.save(freshness_key, entries)?;
    summary.elapsed = started.elapsed();
    Ok(summary)
}

async fn generate_one(task: Task, oracle: &Arc<dyn Oracle>, parser: &dyn FixtureParser) -> Generated {
    let bytes = match tokio::fs::read(task.fixture_path()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(task = %task, error = %e, "Skipping unreadable fixture");
            return Generated::Skipped;
        }
    };
    let Ok(content) = std::str::from_utf8(&bytes) else {
        return Generated::Skipped;
    };
    let (fragments, configuration) = match parser.prepare(&task, content) {
        Prepared::Ready {
            fragments,
            configuration,
        } => (fragments, configuration),
        Prepared::Skip(reason) => {
            tracing::debug!(task = %task, %reason, "Skipping fixture");
            return Generated::Skipped;
        }
    };

    let hash = content_hash(&bytes);
    let entry = match run_oracle(oracle, &fragments, &configuration).await {
        Ok(codes) => CacheEntry::new(codes, hash),
        Err(detail) => {
            tracing::warn!(task = %task, %detail, "Oracle failed");
            CacheEntry::oracle_crash(hash, detail)
        }
    };
    Generated::Entry(task.cache_key().to_string(), entry)
}
