//! Loading, validating and saving the result cache
//!
//! A cache that is missing, stale or unreadable degrades to "no cache". The
//! run then recomputes oracle results instead of failing.

use crate::entry::{CacheEntry, CacheFile};
use crate::hashing::content_hash;
use crosscheck_core::{Error, Result, Task, CACHE_SCHEMA_VERSION};
use crosscheck_utils::atomic_file::write_atomic;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// What `ResultCache::load` found on disk
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(CacheFile),
    Missing,
    /// Schema version or freshness key differ from the current run
    Stale { reason: String },
    /// The file could not be read or parsed
    Corrupt { reason: String },
}

impl LoadOutcome {
    /// The usable cache, if any
    pub fn into_cache(self) -> Option<CacheFile> {
        match self {
            LoadOutcome::Loaded(file) => Some(file),
            _ => None,
        }
    }
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOutcome::Loaded(file) => write!(f, "loaded {} entries", file.len()),
            LoadOutcome::Missing => write!(f, "no cache file"),
            LoadOutcome::Stale { reason } => write!(f, "stale cache ({reason})"),
            LoadOutcome::Corrupt { reason } => write!(f, "unreadable cache ({reason})"),
        }
    }
}

/// Handle on the cache file location and the schema version this build understands
#[derive(Debug, Clone)]
pub struct ResultCache {
    path: PathBuf,
    schema_version: u32,
}

impl ResultCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            schema_version: CACHE_SCHEMA_VERSION,
        }
    }

    /// Override the expected schema version
    pub fn with_schema_version(mut self, schema_version: u32) -> Self {
        self.schema_version = schema_version;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Read and validate the cache file; never fails
    pub fn load(&self, freshness_key: &str) -> LoadOutcome {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No result cache found, oracle will run for every task");
                return LoadOutcome::Missing;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read result cache, ignoring it");
                return LoadOutcome::Corrupt {
                    reason: e.to_string(),
                };
            }
        };

        let file: CacheFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Result cache is malformed, ignoring it");
                return LoadOutcome::Corrupt {
                    reason: e.to_string(),
                };
            }
        };

        if file.schema_version != self.schema_version {
            let reason = format!(
                "schema version {} but expected {}",
                file.schema_version, self.schema_version
            );
            tracing::warn!(path = %self.path.display(), %reason, "Result cache is stale, ignoring it");
            return LoadOutcome::Stale { reason };
        }

        if file.freshness_key != freshness_key {
            let reason = format!(
                "freshness key '{}' but current is '{}'",
                file.freshness_key, freshness_key
            );
            tracing::warn!(path = %self.path.display(), %reason, "Result cache is stale, ignoring it");
            return LoadOutcome::Stale { reason };
        }

        tracing::info!(
            path = %self.path.display(),
            entries = file.len(),
            generated_at = %file.generated_at,
            "Loaded result cache"
        );
        LoadOutcome::Loaded(file)
    }

    /// Replace the cache file with `entries`, atomically
    pub fn save(&self, freshness_key: &str, entries: BTreeMap<String, CacheEntry>) -> Result<()> {
        let file = CacheFile::new(self.schema_version, freshness_key, entries);
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::json("Failed to serialize result cache", e))?;
        write_atomic(&self.path, content.as_bytes())?;
        tracing::info!(path = %self.path.display(), entries = file.len(), "Saved result cache");
        Ok(())
    }
}

impl CacheFile {
    /// Cached entry for `task`, only if it was recorded for this exact content
    pub fn lookup(&self, task: &Task, content: &[u8]) -> Option<&CacheEntry> {
        let entry = self.entries.get(task.cache_key())?;
        if entry.content_hash == content_hash(content) {
            Some(entry)
        } else {
            tracing::debug!(task = %task.relative_path, "Cached entry does not match fixture content");
            None
        }
    }
}

/// Collects oracle results produced during a run so they can be written back
#[derive(Debug, Default)]
pub struct CacheWriter {
    base: BTreeMap<String, CacheEntry>,
    fresh: BTreeMap<String, CacheEntry>,
}

impl CacheWriter {
    /// Start from the entries of an already loaded cache, if any
    pub fn new(base: Option<&CacheFile>) -> Self {
        Self {
            base: base.map(|file| file.entries.clone()).unwrap_or_default(),
            fresh: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, key: impl Into<String>, entry: CacheEntry) {
        self.fresh.insert(key.into(), entry);
    }

    /// Merge fresh entries over the base and save; a no-op when nothing is new
    pub fn persist(self, cache: &ResultCache, freshness_key: &str) -> Result<usize> {
        let fresh = self.fresh.len();
        if fresh == 0 {
            return Ok(0);
        }
        let mut entries = self.base;
        entries.extend(self.fresh);
        cache.save(freshness_key, entries)?;
        Ok(fresh)
    }
}
