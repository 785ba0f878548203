//! Task discovery, comparison and run orchestration for crosscheck
//!
//! This crate turns a fixture tree into tasks, evaluates each one against the
//! oracle (or the result cache) and the candidate pool, and aggregates the
//! verdicts into run statistics.

pub mod command;
pub mod compare;
pub mod fixture;
pub mod generate;
pub mod report;
pub mod runner;
pub mod source;
pub mod stats;

pub use command::CommandChecker;
pub use compare::{compare, histogram, CodeHistogram, Comparison};
pub use fixture::{FixtureParser, Prepared, SingleFileParser};
pub use generate::{generate_cache, GenerateSummary};
pub use report::render_summary;
pub use runner::{RunConfig, Runner, SKIP_NON_UTF8, SKIP_ORACLE_CRASHED};
pub use source::{SourceConfig, TaskSource};
pub use stats::{CacheUse, CategoryStats, RunStats, TaskOutcome, TaskReport};
