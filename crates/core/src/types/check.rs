//! The inputs an implementation is checked against and the two contracts

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One named piece of source handed to an implementation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFragment {
    pub name: String,
    pub content: String,
}

impl SourceFragment {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

/// Option settings attached to a fixture, kept ordered for stable hashing and display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, String>);

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// The trusted reference implementation
///
/// Called by the run orchestrator on the blocking thread pool. Any error is
/// recorded as an oracle crash for that task.
pub trait Oracle: Send + Sync {
    fn check(&self, fragments: &[SourceFragment], configuration: &Configuration)
        -> Result<Vec<u32>>;
}

/// The implementation under test, always run inside a pool worker
///
/// An `Err` is reported as a crash of the check without tearing the worker
/// down; a panic or abnormal exit takes the worker with it.
pub trait Candidate: Send + Sync {
    fn check(&self, fragments: &[SourceFragment], configuration: &Configuration)
        -> Result<Vec<u32>>;

    /// Memory the implementation currently holds, if it can tell
    fn memory_usage(&self) -> Option<u64> {
        None
    }
}

impl<T: Oracle + ?Sized> Oracle for std::sync::Arc<T> {
    fn check(
        &self,
        fragments: &[SourceFragment],
        configuration: &Configuration,
    ) -> Result<Vec<u32>> {
        (**self).check(fragments, configuration)
    }
}

impl<T: Candidate + ?Sized> Candidate for std::sync::Arc<T> {
    fn check(
        &self,
        fragments: &[SourceFragment],
        configuration: &Configuration,
    ) -> Result<Vec<u32>> {
        (**self).check(fragments, configuration)
    }

    fn memory_usage(&self) -> Option<u64> {
        (**self).memory_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_serializes_as_plain_map() {
        let config = Configuration::new()
            .with("strict", "true")
            .with("target", "es5");
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(json, r#"{"strict":"true","target":"es5"}"#);
        assert_eq!(config.get("target"), Some("es5"));
    }
}
