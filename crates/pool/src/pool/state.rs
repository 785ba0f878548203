//! Bookkeeping owned by the pool control loop

use crate::worker::{WorkerId, WorkerLink};
use crosscheck_core::{CandidateOutcome, Configuration, Result, SourceFragment, Task};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub(crate) type Reply = oneshot::Sender<Result<CandidateOutcome>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerState {
    /// Launched, not yet ready
    Starting,
    Idle,
    Busy,
}

pub(crate) struct WorkerHandle {
    pub id: WorkerId,
    /// Position in the pool that replacements inherit
    pub slot: usize,
    pub link: Box<dyn WorkerLink>,
    pub state: WorkerState,
    pub tasks_processed: u64,
    pub last_memory_bytes: Option<u64>,
    /// Failures of earlier workers in the same slot
    pub crash_count: u32,
    pub spawned_at: Instant,
}

/// A check that a worker is currently running
pub(crate) struct PendingTask {
    pub seq: u64,
    pub task: Task,
    pub reply: Reply,
    pub started: Instant,
    pub timeout: Duration,
    pub deadline: JoinHandle<()>,
}

impl PendingTask {
    /// Resolve the caller exactly once and stop the deadline timer
    pub fn resolve(self, result: Result<CandidateOutcome>) {
        self.deadline.abort();
        if self.reply.send(result).is_err() {
            tracing::debug!(task = %self.task, "Dispatch caller went away before the result");
        }
    }
}

/// A dispatch waiting for an idle worker
pub(crate) struct DispatchRequest {
    pub task: Task,
    pub fragments: Vec<SourceFragment>,
    pub configuration: Configuration,
    pub reply: Reply,
}

/// Worker lifecycle counters, reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolHealth {
    pub spawned: u64,
    pub crashed: u64,
    pub oom: u64,
    pub timed_out: u64,
    /// Replacements started after a crash or timeout
    pub respawned: u64,
    /// Workers retired on the task-count or memory budget
    pub recycled: u64,
    pub spawn_failures: u64,
}

impl PoolHealth {
    pub fn merge(&mut self, other: &PoolHealth) {
        self.spawned += other.spawned;
        self.crashed += other.crashed;
        self.oom += other.oom;
        self.timed_out += other.timed_out;
        self.respawned += other.respawned;
        self.recycled += other.recycled;
        self.spawn_failures += other.spawn_failures;
    }
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    /// Slots still in service
    pub size: usize,
    pub idle: usize,
    pub busy: usize,
    pub starting: usize,
    /// Retired workers still inside their grace period
    pub retiring: usize,
    pub waiting: usize,
    pub timeout: Duration,
    pub memory_budget_bytes: u64,
    pub health: PoolHealth,
}

impl PoolSnapshot {
    /// Nothing is launching or winding down
    pub fn is_settled(&self) -> bool {
        self.starting == 0 && self.retiring == 0
    }
}
