//! Best-effort classification of how a worker ended

use crosscheck_core::FailureKind;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

const SIGKILL: i32 = 9;

/// Phrases runtimes print when an allocation fails
const OOM_MARKERS: &[&str] = &[
    "out of memory",
    "memory allocation of",
    "allocation failed",
    "cannot allocate memory",
    "heap out of memory",
    "oom-kill",
];

/// Everything known about a worker that stopped running
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// Panic message or captured diagnostic text
    pub detail: Option<String>,
}

impl WorkerExit {
    pub fn clean() -> Self {
        Self {
            code: Some(0),
            ..Self::default()
        }
    }

    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            signal: Some(signal),
            ..Self::default()
        }
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self {
            detail: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn from_status(status: &std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            detail: None,
        }
    }
}

impl Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.signal, self.code) {
            (Some(signal), _) => write!(f, "worker killed by signal {signal}")?,
            (None, Some(code)) => write!(f, "worker exited with code {code}")?,
            (None, None) => write!(f, "worker stopped")?,
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// True when diagnostic text reads like an allocation failure
pub fn mentions_oom(text: &str) -> bool {
    let lower = text.to_lowercase();
    OOM_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Map an exit to a failure kind
///
/// SIGKILL is attributed to the kernel OOM killer because the pool only
/// delivers it to workers it has already removed from service.
pub fn classify_exit(exit: &WorkerExit) -> FailureKind {
    let detail_says_oom = exit.detail.as_deref().is_some_and(mentions_oom);

    if detail_says_oom {
        return FailureKind::Oom;
    }
    match (exit.signal, exit.code) {
        (Some(SIGKILL), _) | (None, Some(137)) => FailureKind::Oom,
        (Some(_), _) => FailureKind::Crash,
        (None, Some(code)) if code != 0 => FailureKind::Crash,
        _ if exit.detail.is_some() => FailureKind::Crash,
        _ => FailureKind::Unknown,
    }
}

/// Classify a check that failed without taking its worker down
///
/// A checker process that died inside the worker is judged by its exit like
/// a worker would be; anything else only by its text.
pub fn classify_failure(detail: &str, exit: Option<&WorkerExit>) -> FailureKind {
    match exit {
        Some(exit) => match classify_exit(exit) {
            FailureKind::Unknown => FailureKind::Crash,
            kind => kind,
        },
        None if mentions_oom(detail) => FailureKind::Oom,
        None => FailureKind::Crash,
    }
}
