//! How a candidate run resolved

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::time::Duration;

/// Best-effort classification of an abnormal worker end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// The worker or the check failed abnormally
    Crash,
    /// The failure looks like memory exhaustion
    Oom,
    /// Not enough information to tell
    Unknown,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Crash => write!(f, "crash"),
            FailureKind::Oom => write!(f, "out of memory"),
            FailureKind::Unknown => write!(f, "unknown failure"),
        }
    }
}

/// Resolution of one dispatched candidate run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Completed {
        codes: Vec<u32>,
        duration: Duration,
    },
    Crashed {
        kind: FailureKind,
        detail: String,
    },
    TimedOut {
        after: Duration,
    },
}

impl CandidateOutcome {
    pub fn codes(&self) -> Option<&[u32]> {
        match self {
            CandidateOutcome::Completed { codes, .. } => Some(codes),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, CandidateOutcome::Completed { .. })
    }
}
