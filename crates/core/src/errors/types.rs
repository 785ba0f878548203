//! Core error type definitions

use std::path::PathBuf;

/// Result type alias for crosscheck operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for crosscheck operations using thiserror
///
/// Per-task failures (a crashed candidate, a timed out worker, a stale cache
/// entry) are values, not errors. Only failures that stop a whole operation
/// end up here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors
    Configuration { message: String },

    /// File system operations
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// Command execution errors
    CommandExecution {
        command: String,
        args: Vec<String>,
        message: String,
        exit_code: Option<i32>,
        /// Signal that terminated the command, on unix
        signal: Option<i32>,
    },

    /// The pool could not keep enough workers alive to continue
    WorkerSpawn { message: String },

    /// The pool was shut down before the request could be served
    PoolClosed,

    /// A worker sent a message that does not follow the wire protocol
    Protocol { message: String },

    /// Operation timeout errors
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },
}
