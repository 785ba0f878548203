//! Fixture discovery
//!
//! Walks a fixture tree in file-name order and yields one [`Task`] per
//! recognised fixture. The walk is lazy and restarts on every call to
//! [`TaskSource::iter`].

use crosscheck_core::{
    Task, TaskId, DEFAULT_EXCLUDED_SUFFIXES, DEFAULT_FIXTURE_SUFFIXES, ROOT_CATEGORY,
};
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// What to pick up from the fixture tree
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub root: PathBuf,
    /// File name endings that mark a fixture
    pub suffixes: Vec<String>,
    /// File name endings that are never fixtures, checked after `suffixes`
    pub excluded_suffixes: Vec<String>,
    /// Paths containing any of these fragments are dropped
    pub excluded_fragments: Vec<String>,
    /// Keep only paths containing this substring
    pub filter: Option<String>,
    /// Keep only this category
    pub category: Option<String>,
    /// Matches to skip before yielding the first task
    pub offset: usize,
    /// Stop after this many tasks; `0` means no limit
    pub max: usize,
}

impl SourceConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            suffixes: DEFAULT_FIXTURE_SUFFIXES.iter().map(|s| s.to_string()).collect(),
            excluded_suffixes: DEFAULT_EXCLUDED_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            excluded_fragments: Vec::new(),
            filter: None,
            category: None,
            offset: 0,
            max: 0,
        }
    }

    pub fn with_suffixes(mut self, suffixes: Vec<String>) -> Self {
        self.suffixes = suffixes;
        self
    }

    pub fn with_excluded_fragments(mut self, fragments: Vec<String>) -> Self {
        self.excluded_fragments = fragments;
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }
}

/// Restartable, lazily walked sequence of tasks
#[derive(Debug, Clone)]
pub struct TaskSource {
    config: SourceConfig,
}

impl TaskSource {
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Walk the tree from the start
    pub fn iter(&self) -> impl Iterator<Item = Task> + '_ {
        let limit = match self.config.max {
            0 => usize::MAX,
            max => max,
        };

        WalkDir::new(&self.config.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::trace!(error = %e, "Skipping unreadable fixture path");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| self.describe(&entry))
            .skip(self.config.offset)
            .take(limit)
            .enumerate()
            .map(|(index, (path, category, relative))| {
                Task::new(TaskId(index as u64), path, category, relative)
            })
    }

    /// Path, category and relative path of a fixture that passes every filter
    fn describe(&self, entry: &DirEntry) -> Option<(PathBuf, String, String)> {
        let name = entry.file_name().to_string_lossy();
        if !self.config.suffixes.iter().any(|s| name.ends_with(s.as_str())) {
            return None;
        }
        if self
            .config
            .excluded_suffixes
            .iter()
            .any(|s| name.ends_with(s.as_str()))
        {
            return None;
        }

        let relative = entry.path().strip_prefix(&self.config.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let relative_path = parts.join("/");

        if self
            .config
            .excluded_fragments
            .iter()
            .any(|fragment| relative_path.contains(fragment.as_str()))
        {
            return None;
        }
        if let Some(filter) = &self.config.filter {
            if !relative_path.contains(filter.as_str()) {
                return None;
            }
        }

        let category = match parts.as_slice() {
            [first, _, ..] => first.clone(),
            _ => ROOT_CATEGORY.to_string(),
        };
        if let Some(wanted) = &self.config.category {
            if &category != wanted {
                return None;
            }
        }

        Some((entry.path().to_path_buf(), category, relative_path))
    }
}
