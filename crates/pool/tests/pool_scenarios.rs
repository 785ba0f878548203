//! End-to-end pool behaviour with in-process workers

use crosscheck_core::{
    Candidate, CandidateOutcome, Configuration, Error, FailureKind, Result, SourceFragment, Task,
    TaskId,
};
use crosscheck_pool::worker::{WorkerReport, WorkerRequest};
use crosscheck_pool::{
    PoolConfig, PoolSnapshot, ThreadLauncher, WorkerEvents, WorkerExit, WorkerId, WorkerLauncher,
    WorkerLink, WorkerPool,
};
use crosscheck_utils::memory::FixedMemory;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const GIB: u64 = 1024 * 1024 * 1024;

/// Behaves according to the fixture text it is given
struct Scripted;

impl Candidate for Scripted {
    fn check(&self, fragments: &[SourceFragment], _: &Configuration) -> Result<Vec<u32>> {
        let script = fragments.first().map(|f| f.content.as_str()).unwrap_or("");
        if let Some(codes) = script.strip_prefix("codes:") {
            return Ok(codes.split(',').filter_map(|c| c.parse().ok()).collect());
        }
        if let Some(ms) = script.strip_prefix("sleep:") {
            let ms: u64 = ms.parse().unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
            return Ok(Vec::new());
        }
        match script {
            "panic" => panic!("boom"),
            "oom" => panic!("memory allocation of 1073741824 bytes failed"),
            "error" => Err(Error::configuration("candidate rejected input")),
            _ => Ok(Vec::new()),
        }
    }
}

/// Reports a huge footprint so every heartbeat breaks the budget
struct Hungry;

impl Candidate for Hungry {
    fn check(&self, _: &[SourceFragment], _: &Configuration) -> Result<Vec<u32>> {
        Ok(Vec::new())
    }

    fn memory_usage(&self) -> Option<u64> {
        Some(64 * GIB)
    }
}

/// Workers that die the way the OS OOM killer ends a process
struct KilledBySignal;

struct ChannelLink(crossbeam::channel::Sender<WorkerRequest>);

impl WorkerLink for ChannelLink {
    fn send(&mut self, request: WorkerRequest) -> Result<()> {
        self.0.send(request).map_err(|_| Error::protocol("gone"))
    }
    fn shutdown(&mut self) {
        let _ = self.0.send(WorkerRequest::Shutdown);
    }
    fn kill(&mut self) {}
}

impl WorkerLauncher for KilledBySignal {
    fn launch(&self, _id: WorkerId, events: WorkerEvents) -> Result<Box<dyn WorkerLink>> {
        let (tx, rx) = crossbeam::channel::unbounded();
        std::thread::spawn(move || {
            events.report(WorkerReport::Ready);
            while let Ok(request) = rx.recv() {
                match request {
                    WorkerRequest::Check { fragments, .. } if fragments[0].content == "sigkill" => {
                        events.exited(WorkerExit::signaled(9));
                        return;
                    }
                    WorkerRequest::Check { seq, .. } => {
                        events.report(WorkerReport::Finished {
                            seq,
                            result: crosscheck_pool::worker::CheckResult::Codes { codes: vec![1] },
                            memory_bytes: None,
                        });
                    }
                    WorkerRequest::Shutdown => break,
                }
            }
            events.exited(WorkerExit::clean());
        });
        Ok(Box::new(ChannelLink(tx)))
    }

    fn describe(&self) -> String {
        "signal".to_string()
    }
}

/// Never manages to start a worker
struct Broken;

impl WorkerLauncher for Broken {
    fn launch(&self, id: WorkerId, _: WorkerEvents) -> Result<Box<dyn WorkerLink>> {
        Err(Error::worker_spawn(format!("cannot start {id}")))
    }

    fn describe(&self) -> String {
        "broken".to_string()
    }
}

/// Workers exit before ever reporting ready
struct DiesOnStartup;

impl WorkerLauncher for DiesOnStartup {
    fn launch(&self, _: WorkerId, events: WorkerEvents) -> Result<Box<dyn WorkerLink>> {
        let (tx, _rx) = crossbeam::channel::unbounded();
        events.exited(WorkerExit::with_code(1));
        Ok(Box::new(ChannelLink(tx)))
    }

    fn describe(&self) -> String {
        "dies".to_string()
    }
}

/// First worker comes up, second dies before ready, nothing launches after that
struct OneSurvivor {
    launches: AtomicUsize,
    healthy: ThreadLauncher,
}

impl WorkerLauncher for OneSurvivor {
    fn launch(&self, id: WorkerId, events: WorkerEvents) -> Result<Box<dyn WorkerLink>> {
        match self.launches.fetch_add(1, Ordering::SeqCst) {
            0 => self.healthy.launch(id, events),
            1 => DiesOnStartup.launch(id, events),
            _ => Broken.launch(id, events),
        }
    }

    fn describe(&self) -> String {
        "one survivor".to_string()
    }
}

/// The checker process a worker runs gets SIGKILLed while the worker lives on
#[cfg(unix)]
struct CheckerKilled;

#[cfg(unix)]
impl Candidate for CheckerKilled {
    fn check(&self, _: &[SourceFragment], _: &Configuration) -> Result<Vec<u32>> {
        use std::os::unix::process::ExitStatusExt;
        let status = std::process::ExitStatus::from_raw(9);
        Err(Error::command_exited("tsc", vec!["a.ts".into()], "no output", &status))
    }
}

fn config(workers: usize) -> PoolConfig {
    PoolConfig::default()
        .with_workers(workers)
        .with_grace_period(Duration::from_millis(200))
        .with_startup_timeout(Duration::from_secs(10))
}

async fn start(config: PoolConfig, launcher: impl WorkerLauncher) -> WorkerPool {
    WorkerPool::start(config, Arc::new(launcher), Arc::new(FixedMemory(16 * GIB)))
        .await
        .expect("pool starts")
}

fn task(id: u64) -> Task {
    Task::new(TaskId(id), format!("/fixtures/t{id}.ts"), "t", format!("t/t{id}.ts"))
}

async fn run(pool: &WorkerPool, id: u64, script: &str) -> Result<CandidateOutcome> {
    pool.dispatch(
        task(id),
        vec![SourceFragment::new("test.ts", script)],
        Configuration::new(),
    )
    .await
}

/// Wait for replacements to come up and retired workers to go away
async fn settle(pool: &WorkerPool) -> PoolSnapshot {
    for _ in 0..500 {
        let snapshot = pool.snapshot().await.unwrap();
        if snapshot.is_settled() && snapshot.idle == snapshot.size {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pool did not settle: {:?}", pool.snapshot().await.unwrap());
}

fn assert_size_invariant(snapshot: &PoolSnapshot) {
    assert_eq!(
        snapshot.idle + snapshot.busy + snapshot.starting,
        snapshot.size,
        "{snapshot:?}"
    );
}

#[tokio::test]
async fn test_every_dispatch_resolves_once() {
    let pool = start(
        config(3).with_timeout_override(Duration::from_millis(300)),
        ThreadLauncher::new(Arc::new(Scripted)),
    )
    .await;
    assert_size_invariant(&pool.snapshot().await.unwrap());

    let scripts = [
        "codes:1,2", "panic", "sleep:2000", "error", "codes:3", "oom", "codes:4,4", "sleep:1",
    ];
    let handles: Vec<_> = scripts
        .iter()
        .enumerate()
        .map(|(i, script)| {
            let pool = pool.clone();
            let script = script.to_string();
            tokio::spawn(async move { run(&pool, i as u64, &script).await })
        })
        .collect();

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().expect("pool stays up"));
        assert_size_invariant(&pool.snapshot().await.unwrap());
    }
    assert_eq!(outcomes.len(), scripts.len());

    assert_eq!(outcomes[0].codes(), Some(&[1, 2][..]));
    assert!(matches!(
        outcomes[1],
        CandidateOutcome::Crashed { kind: FailureKind::Crash, .. }
    ));
    assert!(matches!(outcomes[2], CandidateOutcome::TimedOut { .. }));
    assert!(matches!(
        outcomes[3],
        CandidateOutcome::Crashed { kind: FailureKind::Crash, .. }
    ));
    assert_eq!(outcomes[4].codes(), Some(&[3][..]));
    assert!(matches!(
        outcomes[5],
        CandidateOutcome::Crashed { kind: FailureKind::Oom, .. }
    ));
    assert_eq!(outcomes[6].codes(), Some(&[4, 4][..]));
    assert!(outcomes[7].is_completed());

    let snapshot = settle(&pool).await;
    assert_eq!(snapshot.size, 3);
    assert_eq!(snapshot.health.timed_out, 1);
    // Panic and OOM took their workers down; the candidate error did not
    assert_eq!(snapshot.health.crashed, 2);
    assert_eq!(snapshot.health.respawned, 3);
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_timeout_kills_and_replaces_worker() {
    let pool = start(
        config(2).with_timeout_override(Duration::from_millis(200)),
        ThreadLauncher::new(Arc::new(Scripted)),
    )
    .await;
    let before = pool.snapshot().await.unwrap().health;

    let outcome = run(&pool, 1, "sleep:5000").await.unwrap();
    assert_eq!(
        outcome,
        CandidateOutcome::TimedOut {
            after: Duration::from_millis(200)
        }
    );

    let snapshot = settle(&pool).await;
    assert_eq!(snapshot.health.respawned, before.respawned + 1);
    assert_eq!(snapshot.health.timed_out, 1);
    assert_eq!(snapshot.idle, 2);

    let next = run(&pool, 2, "codes:7").await.unwrap();
    assert_eq!(next.codes(), Some(&[7][..]));
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_kill_signal_is_reported_as_oom() {
    let pool = start(config(2), KilledBySignal).await;

    let outcome = run(&pool, 1, "sigkill").await.unwrap();
    match outcome {
        CandidateOutcome::Crashed { kind, detail } => {
            assert_eq!(kind, FailureKind::Oom);
            assert!(detail.contains("signal 9"), "{detail}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let snapshot = settle(&pool).await;
    assert_eq!(snapshot.health.oom, 1);
    assert_eq!(snapshot.health.crashed, 1);
    assert_eq!(snapshot.health.respawned, 1);
    assert_eq!(snapshot.size, 2);

    assert!(run(&pool, 2, "fine").await.unwrap().is_completed());
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_workers_recycle_after_task_limit() {
    let pool = start(
        config(1).with_max_tasks_per_worker(2),
        ThreadLauncher::new(Arc::new(Scripted)),
    )
    .await;

    for id in 0..5 {
        let outcome = run(&pool, id, "codes:1").await.unwrap();
        assert!(outcome.is_completed());
    }

    let snapshot = settle(&pool).await;
    assert_eq!(snapshot.health.recycled, 2);
    assert_eq!(snapshot.health.spawned, 3);
    assert_eq!(snapshot.health.crashed, 0);
    assert_eq!(snapshot.health.respawned, 0);
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_heartbeat_over_budget_recycles_idle_worker() {
    let launcher = ThreadLauncher::new(Arc::new(Hungry)).with_heartbeat(Duration::from_millis(20));
    let pool = WorkerPool::start(config(1), Arc::new(launcher), Arc::new(FixedMemory(GIB)))
        .await
        .unwrap();

    let mut recycled = 0;
    for _ in 0..200 {
        recycled = pool.snapshot().await.unwrap().health.recycled;
        if recycled > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(recycled > 0);
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reported_memory_over_budget_recycles_after_check() {
    // No heartbeat: only the memory sent with the result can trigger this
    let pool = WorkerPool::start(
        config(1),
        Arc::new(ThreadLauncher::new(Arc::new(Hungry))),
        Arc::new(FixedMemory(GIB)),
    )
    .await
    .unwrap();

    assert!(run(&pool, 1, "anything").await.unwrap().is_completed());
    let health = pool.snapshot().await.unwrap().health;
    assert_eq!(health.recycled, 1);
    assert_eq!(health.crashed, 0);

    let snapshot = settle(&pool).await;
    assert_eq!(snapshot.size, 1);
    assert_eq!(snapshot.health.spawned, 2);
    pool.shutdown().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_killed_checker_inside_live_worker_is_oom() {
    let pool = start(config(1), ThreadLauncher::new(Arc::new(CheckerKilled))).await;

    match run(&pool, 1, "").await.unwrap() {
        CandidateOutcome::Crashed { kind, detail } => {
            assert_eq!(kind, FailureKind::Oom);
            assert!(detail.contains("signal 9"), "{detail}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    // The worker itself survived
    assert_eq!(pool.snapshot().await.unwrap().health.crashed, 0);
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_startup_completes_with_fewer_workers_than_requested() {
    let launcher = OneSurvivor {
        launches: AtomicUsize::new(0),
        healthy: ThreadLauncher::new(Arc::new(Scripted)),
    };
    let started = Instant::now();
    let pool = start(config(2).with_min_workers(1), launcher).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    let snapshot = pool.snapshot().await.unwrap();
    assert_eq!(snapshot.size, 1);
    assert_eq!(snapshot.idle, 1);
    assert_eq!(run(&pool, 1, "codes:5").await.unwrap().codes(), Some(&[5][..]));
    pool.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_fails_outstanding_dispatches() {
    let pool = start(config(1), ThreadLauncher::new(Arc::new(Scripted))).await;

    let running = {
        let pool = pool.clone();
        tokio::spawn(async move { run(&pool, 1, "sleep:1000").await })
    };
    let queued = {
        let pool = pool.clone();
        tokio::spawn(async move { run(&pool, 2, "codes:1").await })
    };
    for _ in 0..200 {
        if pool.snapshot().await.unwrap().waiting == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    pool.shutdown().await.unwrap();
    assert!(matches!(running.await.unwrap(), Err(Error::PoolClosed)));
    assert!(matches!(queued.await.unwrap(), Err(Error::PoolClosed)));
    assert!(matches!(run(&pool, 3, "codes:1").await, Err(Error::PoolClosed)));
}

#[tokio::test]
async fn test_unlaunchable_workers_abort_startup() {
    let result =
        WorkerPool::start(config(2), Arc::new(Broken), Arc::new(FixedMemory(16 * GIB))).await;
    assert!(matches!(result, Err(Error::WorkerSpawn { .. })));
}

#[tokio::test]
async fn test_workers_dying_before_ready_abort_startup() {
    let mut config = config(1);
    config.max_startup_failures = 3;
    let result =
        WorkerPool::start(config, Arc::new(DiesOnStartup), Arc::new(FixedMemory(16 * GIB))).await;
    assert!(matches!(result, Err(Error::WorkerSpawn { .. })));
}
