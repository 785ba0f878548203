use clap::{Args, Subcommand};
use crosscheck_core::DEFAULT_CACHE_FILE;
use std::path::PathBuf;

pub mod generate;
pub mod run;
pub mod worker;

#[derive(Subcommand)]
pub enum Commands {
    /// Check every fixture with the candidate and compare against the oracle
    Run(RunArgs),

    /// Run the oracle over every fixture and write a fresh result cache
    #[command(name = "generate-cache")]
    GenerateCache(GenerateArgs),

    /// Serve candidate checks over stdin and stdout (started by `run`)
    #[command(name = "worker", hide = true)]
    Worker {
        /// Candidate command line
        #[arg(long)]
        candidate: String,
    },
}

/// Which fixtures to pick up
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Root of the fixture tree
    #[arg(long, value_name = "DIR")]
    pub fixtures: PathBuf,

    /// Stop after this many fixtures
    #[arg(long)]
    pub max: Option<usize>,

    /// Skip this many fixtures first
    #[arg(long, default_value = "0")]
    pub offset: usize,

    /// Only fixtures in this category (first directory under the root)
    #[arg(long)]
    pub category: Option<String>,

    /// Only fixtures whose path contains this text
    #[arg(long)]
    pub filter: Option<String>,

    /// Fixture file suffix (can be specified multiple times)
    #[arg(long = "suffix", value_name = "SUFFIX")]
    pub suffixes: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Oracle command line; fixture paths are appended
    #[arg(long)]
    pub oracle: String,

    /// Candidate command line; fixture paths are appended
    #[arg(long)]
    pub candidate: String,

    /// Number of candidate workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Fixed per-fixture timeout in seconds instead of the adaptive one
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Result cache to read oracle output from
    #[arg(long, value_name = "FILE")]
    pub cache: Option<PathBuf>,

    /// Oracle identity the cache must match (defaults to `oracle --version`)
    #[arg(long)]
    pub freshness_key: Option<String>,

    /// Write fresh oracle results back to the cache
    #[arg(long, requires = "cache")]
    pub write_cache: bool,

    /// Only report mismatches where either side emitted this code
    #[arg(long, value_name = "N")]
    pub error_code: Option<u32>,

    /// Show the expected and actual codes of every reported mismatch
    #[arg(long)]
    pub print_test: bool,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Oracle command line; fixture paths are appended
    #[arg(long)]
    pub oracle: String,

    /// Cache file to write
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CACHE_FILE)]
    pub output: PathBuf,

    /// Number of oracle checks in flight
    #[arg(long)]
    pub workers: Option<usize>,

    /// Oracle identity to record (defaults to `oracle --version`)
    #[arg(long)]
    pub freshness_key: Option<String>,
}

impl SourceArgs {
    pub fn to_config(&self) -> crosscheck_task::SourceConfig {
        let mut config = crosscheck_task::SourceConfig::new(&self.fixtures)
            .with_offset(self.offset)
            .with_max(self.max.unwrap_or(0))
            .with_category(self.category.clone())
            .with_filter(self.filter.clone());
        if !self.suffixes.is_empty() {
            config = config.with_suffixes(self.suffixes.clone());
        }
        config
    }
}
