//! The single task that owns every piece of pool state
//!
//! Callers, workers and timers only ever talk to the loop through channels,
//! so each pending result is resolved in exactly one place and a worker id,
//! once retired, is never confused with its replacement.

use super::state::{
    DispatchRequest, PendingTask, PoolHealth, PoolSnapshot, WorkerHandle, WorkerState,
};
use crate::adaptive::{AdaptiveMemoryBudget, AdaptiveTimeout};
use crate::classify::{classify_exit, classify_failure, WorkerExit};
use crate::config::PoolConfig;
use crate::worker::{
    CheckResult, WorkerEvent, WorkerEvents, WorkerId, WorkerLauncher, WorkerLink, WorkerMessage,
    WorkerReport, WorkerRequest,
};
use crosscheck_core::{CandidateOutcome, Error, FailureKind, Result};
use crosscheck_utils::memory::MemoryProbe;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

pub(crate) enum Command {
    Dispatch(DispatchRequest),
    Snapshot(oneshot::Sender<PoolSnapshot>),
    AwaitReady(oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<PoolHealth>),
}

pub(crate) enum Timer {
    Deadline { worker: WorkerId, seq: u64 },
    Reap { worker: WorkerId },
}

pub(crate) struct ControlLoop {
    config: PoolConfig,
    launcher: Arc<dyn WorkerLauncher>,
    probe: Arc<dyn MemoryProbe>,
    workers: HashMap<WorkerId, WorkerHandle>,
    available: VecDeque<WorkerId>,
    pending: HashMap<WorkerId, PendingTask>,
    waiting: VecDeque<DispatchRequest>,
    retiring: HashMap<WorkerId, Box<dyn WorkerLink>>,
    ready_waiters: Vec<oneshot::Sender<Result<()>>>,
    slots: usize,
    next_worker: u64,
    next_seq: u64,
    timeout: AdaptiveTimeout,
    memory: AdaptiveMemoryBudget,
    health: PoolHealth,
    startup_failures: u32,
    failure: Option<String>,
    closing: bool,
    events_tx: mpsc::UnboundedSender<WorkerMessage>,
    timers_tx: mpsc::UnboundedSender<Timer>,
}

impl ControlLoop {
    pub fn new(
        config: PoolConfig,
        launcher: Arc<dyn WorkerLauncher>,
        probe: Arc<dyn MemoryProbe>,
        events_tx: mpsc::UnboundedSender<WorkerMessage>,
        timers_tx: mpsc::UnboundedSender<Timer>,
    ) -> Self {
        let timeout = match config.timeout_override {
            Some(fixed) => AdaptiveTimeout::pinned(config.timeout, fixed),
            None => AdaptiveTimeout::new(config.timeout),
        };
        Self {
            slots: config.workers,
            memory: AdaptiveMemoryBudget::new(config.memory),
            timeout,
            config,
            launcher,
            probe,
            workers: HashMap::new(),
            available: VecDeque::new(),
            pending: HashMap::new(),
            waiting: VecDeque::new(),
            retiring: HashMap::new(),
            ready_waiters: Vec::new(),
            next_worker: 1,
            next_seq: 1,
            health: PoolHealth::default(),
            startup_failures: 0,
            failure: None,
            closing: false,
            events_tx,
            timers_tx,
        }
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerMessage>,
        mut timers: mpsc::UnboundedReceiver<Timer>,
    ) {
        tracing::info!(
            workers = self.config.workers,
            launcher = %self.launcher.describe(),
            timeout_ms = self.timeout.current().as_millis() as u64,
            "Starting worker pool"
        );
        for slot in 0..self.config.workers {
            self.spawn_into_slot(slot, 0);
        }
        self.memory.recompute(self.probe.as_ref(), self.slots);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Dispatch(request)) => self.dispatch(request),
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    Some(Command::AwaitReady(reply)) => self.await_ready(reply),
                    Some(Command::Shutdown(reply)) => {
                        let health = self.shutdown(&mut events).await;
                        let _ = reply.send(health);
                        return;
                    }
                    None => {
                        self.shutdown(&mut events).await;
                        return;
                    }
                },
                Some(message) = events.recv() => self.handle_worker(message),
                Some(timer) = timers.recv() => self.handle_timer(timer),
            }
        }
    }

    fn dispatch(&mut self, request: DispatchRequest) {
        if let Some(reason) = &self.failure {
            let _ = request.reply.send(Err(Error::worker_spawn(reason.clone())));
            return;
        }
        self.waiting.push_back(request);
        self.pump();
    }

    fn await_ready(&mut self, reply: oneshot::Sender<Result<()>>) {
        if let Some(reason) = &self.failure {
            let _ = reply.send(Err(Error::worker_spawn(reason.clone())));
        } else if self.starting_count() == 0 {
            let _ = reply.send(Ok(()));
        } else {
            self.ready_waiters.push(reply);
        }
    }

    fn handle_worker(&mut self, message: WorkerMessage) {
        let WorkerMessage { worker, event } = message;

        if self.retiring.contains_key(&worker) {
            if let WorkerEvent::Exited(exit) = event {
                tracing::debug!(%worker, %exit, "Retired worker exited");
                self.retiring.remove(&worker);
            }
            return;
        }
        if !self.workers.contains_key(&worker) {
            tracing::trace!(%worker, "Ignoring event from a replaced worker");
            return;
        }

        match event {
            WorkerEvent::Report(WorkerReport::Ready) => self.on_ready(worker),
            WorkerEvent::Report(WorkerReport::Finished {
                seq,
                result,
                memory_bytes,
            }) => self.on_finished(worker, seq, result, memory_bytes),
            WorkerEvent::Report(WorkerReport::Heartbeat { memory_bytes }) => {
                self.on_heartbeat(worker, memory_bytes)
            }
            WorkerEvent::Exited(exit) => self.on_exited(worker, exit),
        }
    }

    fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Deadline { worker, seq } => self.on_deadline(worker, seq),
            Timer::Reap { worker } => {
                if let Some(mut link) = self.retiring.remove(&worker) {
                    tracing::debug!(%worker, "Killing retired worker after grace period");
                    link.kill();
                }
            }
        }
    }

    fn on_ready(&mut self, worker: WorkerId) {
        let Some(handle) = self.workers.get_mut(&worker) else {
            return;
        };
        if handle.state != WorkerState::Starting {
            return;
        }
        handle.state = WorkerState::Idle;
        tracing::debug!(
            %worker,
            slot = handle.slot,
            startup_ms = handle.spawned_at.elapsed().as_millis() as u64,
            "Worker ready"
        );
        self.startup_failures = 0;
        self.available.push_back(worker);
        self.notify_ready();
        self.pump();
    }

    /// Release `start` once no slot is still waiting for its worker
    fn notify_ready(&mut self) {
        if self.failure.is_some() || self.starting_count() > 0 {
            return;
        }
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn on_finished(
        &mut self,
        worker: WorkerId,
        seq: u64,
        result: CheckResult,
        memory_bytes: Option<u64>,
    ) {
        if !self.pending.get(&worker).is_some_and(|p| p.seq == seq) {
            tracing::debug!(%worker, seq, "Ignoring result for a check that already resolved");
            return;
        }
        let Some(pending) = self.pending.remove(&worker) else {
            return;
        };

        let duration = pending.started.elapsed();
        let outcome = match result {
            CheckResult::Codes { codes } => {
                self.timeout.record(duration);
                CandidateOutcome::Completed { codes, duration }
            }
            CheckResult::Failed { detail, exit } => {
                tracing::warn!(task = %pending.task, %worker, %detail, "Candidate check failed");
                CandidateOutcome::Crashed {
                    kind: classify_failure(&detail, exit.as_ref()),
                    detail,
                }
            }
        };
        pending.resolve(Ok(outcome));

        let Some(handle) = self.workers.get_mut(&worker) else {
            return;
        };
        handle.state = WorkerState::Idle;
        handle.tasks_processed += 1;
        if memory_bytes.is_some() {
            handle.last_memory_bytes = memory_bytes;
        }

        let reason = if handle.tasks_processed >= self.config.max_tasks_per_worker {
            Some("task limit reached")
        } else if memory_bytes.is_some_and(|bytes| self.memory.exceeded(bytes)) {
            Some("memory budget exceeded")
        } else {
            None
        };
        match reason {
            Some(reason) => self.recycle(worker, reason),
            None => self.available.push_back(worker),
        }
        self.pump();
    }

    fn on_heartbeat(&mut self, worker: WorkerId, memory_bytes: u64) {
        let Some(handle) = self.workers.get_mut(&worker) else {
            return;
        };
        handle.last_memory_bytes = Some(memory_bytes);
        if handle.state == WorkerState::Idle && self.memory.exceeded(memory_bytes) {
            self.recycle(worker, "memory budget exceeded while idle");
        }
    }

    fn on_exited(&mut self, worker: WorkerId, exit: WorkerExit) {
        let Some(handle) = self.workers.remove(&worker) else {
            return;
        };
        self.available.retain(|id| *id != worker);

        let kind = classify_exit(&exit);
        self.health.crashed += 1;
        if kind == FailureKind::Oom {
            self.health.oom += 1;
        }

        match self.pending.remove(&worker) {
            Some(pending) => {
                tracing::warn!(task = %pending.task, %worker, %exit, %kind, "Worker died during a check");
                pending.resolve(Ok(CandidateOutcome::Crashed {
                    kind,
                    detail: exit.to_string(),
                }));
            }
            None => tracing::warn!(%worker, %exit, %kind, "Worker exited unexpectedly"),
        }

        if handle.state == WorkerState::Starting {
            self.startup_failures += 1;
            if self.startup_failures > self.config.max_startup_failures {
                self.fail(format!(
                    "{} workers in a row died before becoming ready (last: {exit})",
                    self.startup_failures
                ));
                return;
            }
        }

        self.replace(handle.slot, handle.crash_count + 1);
        self.notify_ready();
        self.pump();
    }

    fn on_deadline(&mut self, worker: WorkerId, seq: u64) {
        if !self.pending.get(&worker).is_some_and(|p| p.seq == seq) {
            return;
        }
        let Some(pending) = self.pending.remove(&worker) else {
            return;
        };

        let after = pending.timeout;
        tracing::warn!(
            task = %pending.task,
            %worker,
            timeout_ms = after.as_millis() as u64,
            "Check timed out, killing worker"
        );
        pending.resolve(Ok(CandidateOutcome::TimedOut { after }));
        self.health.timed_out += 1;

        if let Some(mut handle) = self.workers.remove(&worker) {
            handle.link.kill();
            self.replace(handle.slot, handle.crash_count);
        }
        self.pump();
    }

    /// Hand waiting requests to idle workers in FIFO order
    fn pump(&mut self) {
        while !self.waiting.is_empty() {
            let Some(worker) = self.available.pop_front() else {
                break;
            };
            let Some(request) = self.waiting.pop_front() else {
                self.available.push_front(worker);
                break;
            };
            self.assign(worker, request);
        }
    }

    fn assign(&mut self, worker: WorkerId, request: DispatchRequest) {
        let Some(handle) = self.workers.get_mut(&worker) else {
            self.waiting.push_front(request);
            return;
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        let message = WorkerRequest::Check {
            seq,
            fragments: request.fragments.clone(),
            configuration: request.configuration.clone(),
        };

        if let Err(e) = handle.link.send(message) {
            tracing::warn!(%worker, error = %e, "Worker stopped accepting checks");
            self.waiting.push_front(request);
            if let Some(mut handle) = self.workers.remove(&worker) {
                handle.link.kill();
                self.health.crashed += 1;
                self.replace(handle.slot, handle.crash_count + 1);
            }
            return;
        }

        handle.state = WorkerState::Busy;
        let timeout = self.timeout.current();
        tracing::trace!(task = %request.task, %worker, seq, "Dispatched check");
        let deadline = self.schedule(timeout, Timer::Deadline { worker, seq });
        self.pending.insert(
            worker,
            PendingTask {
                seq,
                task: request.task,
                reply: request.reply,
                started: Instant::now(),
                timeout,
                deadline,
            },
        );
    }

    /// Retire a healthy worker gracefully and start its successor at once
    fn recycle(&mut self, worker: WorkerId, reason: &str) {
        let Some(mut handle) = self.workers.remove(&worker) else {
            return;
        };
        self.available.retain(|id| *id != worker);
        tracing::info!(
            worker = %handle.id,
            tasks = handle.tasks_processed,
            memory_bytes = handle.last_memory_bytes,
            reason,
            "Recycling worker"
        );

        handle.link.shutdown();
        self.retiring.insert(worker, handle.link);
        self.schedule(self.config.grace_period, Timer::Reap { worker });
        self.health.recycled += 1;
        self.spawn_into_slot(handle.slot, handle.crash_count);
    }

    /// Start a successor for a worker that failed
    fn replace(&mut self, slot: usize, crash_count: u32) {
        if self.closing || self.failure.is_some() {
            return;
        }
        if self.spawn_into_slot(slot, crash_count) {
            self.health.respawned += 1;
        }
    }

    fn spawn_into_slot(&mut self, slot: usize, crash_count: u32) -> bool {
        for attempt in 1..=self.config.spawn_attempts {
            let id = WorkerId(self.next_worker);
            self.next_worker += 1;

            match self
                .launcher
                .launch(id, WorkerEvents::new(id, self.events_tx.clone()))
            {
                Ok(link) => {
                    self.workers.insert(
                        id,
                        WorkerHandle {
                            id,
                            slot,
                            link,
                            state: WorkerState::Starting,
                            tasks_processed: 0,
                            last_memory_bytes: None,
                            crash_count,
                            spawned_at: Instant::now(),
                        },
                    );
                    self.health.spawned += 1;
                    tracing::debug!(worker = %id, slot, crash_count, "Launched worker");
                    return true;
                }
                Err(e) => {
                    self.health.spawn_failures += 1;
                    tracing::warn!(slot, attempt, error = %e, "Failed to launch worker");
                }
            }
        }

        self.slots = self.slots.saturating_sub(1);
        tracing::error!(slot, remaining = self.slots, "Giving up on worker slot");
        if self.slots < self.config.min_workers {
            self.fail(format!(
                "only {} workers could be kept alive, at least {} required",
                self.slots, self.config.min_workers
            ));
        } else {
            self.memory.recompute(self.probe.as_ref(), self.slots);
            self.notify_ready();
        }
        false
    }

    /// Stop accepting work after an unrecoverable pool failure
    fn fail(&mut self, reason: String) {
        if self.failure.is_some() {
            return;
        }
        tracing::error!(%reason, "Worker pool cannot continue");
        for request in self.waiting.drain(..) {
            let _ = request.reply.send(Err(Error::worker_spawn(reason.clone())));
        }
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Err(Error::worker_spawn(reason.clone())));
        }
        self.failure = Some(reason);
    }

    async fn shutdown(&mut self, events: &mut mpsc::UnboundedReceiver<WorkerMessage>) -> PoolHealth {
        self.closing = true;

        for request in self.waiting.drain(..) {
            let _ = request.reply.send(Err(Error::PoolClosed));
        }
        for (_, pending) in self.pending.drain() {
            pending.resolve(Err(Error::PoolClosed));
        }
        for waiter in self.ready_waiters.drain(..) {
            let _ = waiter.send(Err(Error::PoolClosed));
        }
        self.available.clear();
        for (id, mut handle) in self.workers.drain() {
            handle.link.shutdown();
            self.retiring.insert(id, handle.link);
        }

        let deadline = tokio::time::Instant::now() + self.config.grace_period;
        while !self.retiring.is_empty() {
            tokio::select! {
                message = events.recv() => match message {
                    Some(WorkerMessage { worker, event: WorkerEvent::Exited(_) }) => {
                        self.retiring.remove(&worker);
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        for (worker, mut link) in self.retiring.drain() {
            tracing::debug!(%worker, "Killing worker that did not stop in time");
            link.kill();
        }

        tracing::info!(
            spawned = self.health.spawned,
            crashed = self.health.crashed,
            oom = self.health.oom,
            timed_out = self.health.timed_out,
            respawned = self.health.respawned,
            recycled = self.health.recycled,
            "Worker pool stopped"
        );
        self.health
    }

    fn schedule(&self, after: Duration, timer: Timer) -> JoinHandle<()> {
        let timers = self.timers_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = timers.send(timer);
        })
    }

    fn starting_count(&self) -> usize {
        self.workers
            .values()
            .filter(|handle| handle.state == WorkerState::Starting)
            .count()
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            size: self.slots,
            idle: self.available.len(),
            busy: self.pending.len(),
            starting: self.starting_count(),
            retiring: self.retiring.len(),
            waiting: self.waiting.len(),
            timeout: self.timeout.current(),
            memory_budget_bytes: self.memory.threshold(),
            health: self.health,
        }
    }
}
