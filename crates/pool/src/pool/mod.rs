//! The worker pool and its caller-facing handle

mod control;
mod state;

pub use state::{PoolHealth, PoolSnapshot};

use crate::config::PoolConfig;
use crate::worker::WorkerLauncher;
use control::{Command, ControlLoop};
use crosscheck_core::{CandidateOutcome, Configuration, Error, Result, SourceFragment, Task};
use crosscheck_utils::memory::MemoryProbe;
use state::DispatchRequest;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Cloneable handle to a running pool
///
/// Every clone talks to the same control loop. The pool shuts down when
/// [`WorkerPool::shutdown`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
}

impl WorkerPool {
    /// Launch every worker and wait until all of them report ready
    pub async fn start(
        config: PoolConfig,
        launcher: Arc<dyn WorkerLauncher>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Result<Self> {
        config.validate()?;
        let startup_timeout = config.startup_timeout;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();
        let control = ControlLoop::new(config, launcher, probe, events_tx, timers_tx);
        tokio::spawn(control.run(commands_rx, events_rx, timers_rx));

        let pool = Self {
            commands: commands_tx,
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        pool.send(Command::AwaitReady(ready_tx))?;

        match tokio::time::timeout(startup_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(pool),
            Ok(Ok(Err(e))) => {
                let _ = pool.shutdown().await;
                Err(e)
            }
            Ok(Err(_)) => Err(Error::PoolClosed),
            Err(_) => {
                let _ = pool.shutdown().await;
                Err(Error::timeout("worker pool startup", startup_timeout))
            }
        }
    }

    /// Run one candidate check on the next idle worker
    ///
    /// Crashes, memory exhaustion and timeouts come back as outcomes. An
    /// `Err` means the pool itself can no longer serve requests.
    pub async fn dispatch(
        &self,
        task: Task,
        fragments: Vec<SourceFragment>,
        configuration: Configuration,
    ) -> Result<CandidateOutcome> {
        let (reply, result) = oneshot::channel();
        self.send(Command::Dispatch(DispatchRequest {
            task,
            fragments,
            configuration,
            reply,
        }))?;
        result.await.map_err(|_| Error::PoolClosed)?
    }

    pub async fn snapshot(&self) -> Result<PoolSnapshot> {
        let (reply, snapshot) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        snapshot.await.map_err(|_| Error::PoolClosed)
    }

    /// Stop every worker, failing outstanding dispatches with `PoolClosed`
    pub async fn shutdown(&self) -> Result<PoolHealth> {
        let (reply, health) = oneshot::channel();
        self.send(Command::Shutdown(reply))?;
        health.await.map_err(|_| Error::PoolClosed)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::PoolClosed)
    }
}
