//! In-process workers, one OS thread each

use super::{
    CheckResult, WorkerEvents, WorkerId, WorkerLauncher, WorkerLink, WorkerReport, WorkerRequest,
};
use crate::classify::WorkerExit;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use crosscheck_core::{Candidate, Error, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Runs a shared candidate on dedicated threads
///
/// A panic inside the candidate ends the worker and is reported as its exit.
/// Threads cannot be killed: a killed worker is detached, and whatever it
/// reports afterwards carries an id the pool no longer knows.
pub struct ThreadLauncher {
    candidate: Arc<dyn Candidate>,
    heartbeat: Option<Duration>,
}

impl ThreadLauncher {
    pub fn new(candidate: Arc<dyn Candidate>) -> Self {
        Self {
            candidate,
            heartbeat: None,
        }
    }

    /// Report `Candidate::memory_usage` at this interval while idle
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, id: WorkerId, events: WorkerEvents) -> Result<Box<dyn WorkerLink>> {
        let (tx, rx) = channel::unbounded::<WorkerRequest>();
        let candidate = Arc::clone(&self.candidate);
        let heartbeat = self.heartbeat;

        std::thread::Builder::new()
            .name(format!("crosscheck-{id}"))
            .spawn(move || {
                let exit = run_worker(candidate.as_ref(), &rx, &events, heartbeat);
                events.exited(exit);
            })
            .map_err(|e| Error::worker_spawn(format!("failed to start thread for {id}: {e}")))?;

        Ok(Box::new(ThreadLink { requests: Some(tx) }))
    }

    fn describe(&self) -> String {
        "thread".to_string()
    }
}

struct ThreadLink {
    requests: Option<Sender<WorkerRequest>>,
}

impl WorkerLink for ThreadLink {
    fn send(&mut self, request: WorkerRequest) -> Result<()> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| Error::protocol("worker thread was detached"))?;
        requests
            .send(request)
            .map_err(|_| Error::protocol("worker thread has stopped"))
    }

    fn shutdown(&mut self) {
        if let Some(requests) = &self.requests {
            let _ = requests.send(WorkerRequest::Shutdown);
        }
    }

    fn kill(&mut self) {
        // Disconnecting ends the loop as soon as the current check returns
        self.requests = None;
    }
}

fn run_worker(
    candidate: &dyn Candidate,
    requests: &channel::Receiver<WorkerRequest>,
    events: &WorkerEvents,
    heartbeat: Option<Duration>,
) -> WorkerExit {
    if !events.report(WorkerReport::Ready) {
        return WorkerExit::clean();
    }

    loop {
        let request = match heartbeat {
            Some(interval) => match requests.recv_timeout(interval) {
                Ok(request) => request,
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(memory_bytes) = candidate.memory_usage() {
                        events.report(WorkerReport::Heartbeat { memory_bytes });
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match requests.recv() {
                Ok(request) => request,
                Err(_) => break,
            },
        };

        let (seq, fragments, configuration) = match request {
            WorkerRequest::Shutdown => break,
            WorkerRequest::Check {
                seq,
                fragments,
                configuration,
            } => (seq, fragments, configuration),
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            candidate.check(&fragments, &configuration)
        }));
        let result = match outcome {
            Ok(Ok(codes)) => CheckResult::Codes { codes },
            Ok(Err(e)) => CheckResult::failed(&e),
            Err(payload) => return WorkerExit::panicked(panic_message(payload.as_ref())),
        };

        let finished = WorkerReport::Finished {
            seq,
            result,
            memory_bytes: candidate.memory_usage(),
        };
        if !events.report(finished) {
            break;
        }
    }

    WorkerExit::clean()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
