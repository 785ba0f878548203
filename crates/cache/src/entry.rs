//! On-disk cache model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Recorded oracle output for one fixture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub codes: Vec<u32>,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crashed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crash_detail: Option<String>,
}

impl CacheEntry {
    pub fn new(codes: Vec<u32>, content_hash: impl Into<String>) -> Self {
        Self {
            codes,
            content_hash: content_hash.into(),
            crashed: None,
            crash_detail: None,
        }
    }

    /// An entry recording that the oracle itself failed on this fixture
    pub fn oracle_crash(content_hash: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            codes: Vec::new(),
            content_hash: content_hash.into(),
            crashed: Some(true),
            crash_detail: Some(detail.into()),
        }
    }

    pub fn is_crash(&self) -> bool {
        self.crashed.unwrap_or(false)
    }
}

/// The whole cache file; always replaced as a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheFile {
    pub schema_version: u32,
    pub freshness_key: String,
    pub generated_at: DateTime<Utc>,
    pub task_count: usize,
    pub entries: BTreeMap<String, CacheEntry>,
}

impl CacheFile {
    pub fn new(
        schema_version: u32,
        freshness_key: impl Into<String>,
        entries: BTreeMap<String, CacheEntry>,
    ) -> Self {
        Self {
            schema_version,
            freshness_key: freshness_key.into(),
            generated_at: Utc::now(),
            task_count: entries.len(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
