//! Task identity and the task value itself

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

/// Sequential identifier assigned by the task source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One fixture submitted for comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Absolute (or root-joined) path of the fixture file
    pub fixture_path: PathBuf,
    /// First path component below the fixture root
    pub category: String,
    /// Path below the fixture root with `/` separators; doubles as the cache key
    pub relative_path: String,
}

impl Task {
    pub fn new(
        id: TaskId,
        fixture_path: impl Into<PathBuf>,
        category: impl Into<String>,
        relative_path: impl Into<String>,
    ) -> Self {
        Self {
            id,
            fixture_path: fixture_path.into(),
            category: category.into(),
            relative_path: relative_path.into(),
        }
    }

    /// Key used to look the task up in the result cache
    pub fn cache_key(&self) -> &str {
        &self.relative_path
    }

    pub fn fixture_path(&self) -> &Path {
        &self.fixture_path
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.relative_path)
    }
}
