//! Display implementations for error types

use super::types::Error;
use std::fmt;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration { message } => {
                write!(f, "configuration error: {message}")
            }
            Error::FileSystem {
                path,
                operation,
                source,
            } => {
                write!(
                    f,
                    "file system {} operation failed for '{}': {}",
                    operation,
                    path.display(),
                    source
                )
            }
            Error::Json { message, .. } => {
                write!(f, "JSON error: {message}")
            }
            Error::CommandExecution {
                command,
                args,
                message,
                exit_code,
                signal,
            } => {
                let args_str = args.join(" ");
                let shown = if args_str.is_empty() {
                    command.clone()
                } else {
                    format!("{command} {args_str}")
                };
                match (signal, exit_code) {
                    (Some(signal), _) => {
                        write!(f, "command '{shown}' killed by signal {signal}: {message}")
                    }
                    (None, Some(code)) => {
                        write!(f, "command '{shown}' failed with exit code {code}: {message}")
                    }
                    (None, None) => write!(f, "command '{shown}' failed: {message}"),
                }
            }
            Error::WorkerSpawn { message } => {
                write!(f, "worker pool cannot keep enough workers alive: {message}")
            }
            Error::PoolClosed => write!(f, "worker pool is shut down"),
            Error::Protocol { message } => {
                write!(f, "worker protocol error: {message}")
            }
            Error::Timeout {
                operation,
                duration,
            } => {
                write!(f, "operation '{operation}' timed out after {duration:?}")
            }
        }
    }
}
