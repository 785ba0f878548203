//! Turning fixture text into what the implementations are given

use crosscheck_core::{Configuration, SourceFragment, Task};

/// Inputs prepared from one fixture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    Ready {
        fragments: Vec<SourceFragment>,
        configuration: Configuration,
    },
    /// The fixture cannot be evaluated, with the reason
    Skip(String),
}

/// Splits a fixture into named fragments and its option settings
pub trait FixtureParser: Send + Sync {
    fn prepare(&self, task: &Task, content: &str) -> Prepared;
}

/// Treats the whole fixture as one file with no options
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleFileParser;

impl FixtureParser for SingleFileParser {
    fn prepare(&self, task: &Task, content: &str) -> Prepared {
        let name = task
            .relative_path
            .rsplit('/')
            .next()
            .unwrap_or(task.relative_path.as_str());
        Prepared::Ready {
            fragments: vec![SourceFragment::new(name, content)],
            configuration: Configuration::new(),
        }
    }
}
