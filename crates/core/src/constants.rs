/// Constants used throughout the crosscheck codebase
// Environment variable names
pub const CROSSCHECK_WORKERS_VAR: &str = "CROSSCHECK_WORKERS";
pub const CROSSCHECK_TIMEOUT_VAR: &str = "CROSSCHECK_TIMEOUT_SECS";
pub const CROSSCHECK_CACHE_FILE_VAR: &str = "CROSSCHECK_CACHE_FILE";
pub const CROSSCHECK_FRESHNESS_KEY_VAR: &str = "CROSSCHECK_FRESHNESS_KEY";

// Cache file defaults
pub const DEFAULT_CACHE_FILE: &str = "crosscheck-cache.json";
pub const CACHE_SCHEMA_VERSION: u32 = 1;
pub const UNKNOWN_FRESHNESS_KEY: &str = "unknown";

// Fixture discovery defaults
pub const DEFAULT_FIXTURE_SUFFIXES: &[&str] = &[".ts", ".tsx", ".js", ".jsx"];
pub const DEFAULT_EXCLUDED_SUFFIXES: &[&str] = &[".d.ts", ".d.mts"];

// Category used for fixtures that sit directly in the fixture root
pub const ROOT_CATEGORY: &str = ".";

// Name of the hidden subcommand a process worker is started with
pub const WORKER_SUBCOMMAND: &str = "worker";
