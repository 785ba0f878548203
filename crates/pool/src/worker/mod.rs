//! Worker isolation units and the seam between them and the pool
//!
//! A worker is launched by a [`WorkerLauncher`], driven through the
//! [`WorkerLink`] it returns, and reports back through [`WorkerEvents`].
//! Two launchers ship with the crate: [`ThreadLauncher`] runs an in-process
//! candidate on a dedicated thread, [`ProcessLauncher`] runs each worker as a
//! child process speaking the [`protocol`].

pub mod process;
pub mod protocol;
pub mod serve;
pub mod thread;

pub use process::ProcessLauncher;
pub use protocol::{CheckResult, WorkerReport, WorkerRequest};
pub use serve::serve;
pub use thread::ThreadLauncher;

use crate::classify::WorkerExit;
use crosscheck_core::Result;
use std::fmt::{self, Display};
use tokio::sync::mpsc;

/// Pool-unique worker identity; never reused within a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Report(WorkerReport),
    /// The worker is gone; sent exactly once, after every report
    Exited(WorkerExit),
}

#[derive(Debug, Clone)]
pub struct WorkerMessage {
    pub worker: WorkerId,
    pub event: WorkerEvent,
}

/// Sending half handed to a launched worker
#[derive(Debug, Clone)]
pub struct WorkerEvents {
    worker: WorkerId,
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerEvents {
    pub fn new(worker: WorkerId, tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self { worker, tx }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Returns false once the pool stopped listening
    pub fn report(&self, report: WorkerReport) -> bool {
        self.send(WorkerEvent::Report(report))
    }

    pub fn exited(&self, exit: WorkerExit) -> bool {
        self.send(WorkerEvent::Exited(exit))
    }

    fn send(&self, event: WorkerEvent) -> bool {
        self.tx
            .send(WorkerMessage {
                worker: self.worker,
                event,
            })
            .is_ok()
    }
}

/// Starts workers on behalf of the pool
///
/// Called from inside the pool's tokio runtime. A launched worker must send
/// [`WorkerReport::Ready`] once it can accept checks and must end with
/// exactly one [`WorkerEvent::Exited`].
pub trait WorkerLauncher: Send + Sync + 'static {
    fn launch(&self, id: WorkerId, events: WorkerEvents) -> Result<Box<dyn WorkerLink>>;

    /// Short name used in logs
    fn describe(&self) -> String;
}

/// Pool-side control of one running worker
pub trait WorkerLink: Send {
    fn send(&mut self, request: WorkerRequest) -> Result<()>;

    /// Ask the worker to finish its loop and exit
    fn shutdown(&mut self);

    /// Stop the worker without waiting for it
    fn kill(&mut self);
}
