//! Child-process workers speaking the line protocol over stdio

use super::protocol::{self, WorkerRequest};
use super::{WorkerEvents, WorkerId, WorkerLauncher, WorkerLink};
use crate::classify::WorkerExit;
use crosscheck_core::{Error, Result, WORKER_SUBCOMMAND};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};

/// How long to keep draining stdout after the child has exited
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Spawns each worker as a separate OS process
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-run the current executable in worker mode
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| {
            Error::file_system(PathBuf::from("<current exe>"), "locate current executable", e)
        })?;
        Ok(Self::new(exe).arg(WORKER_SUBCOMMAND))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, id: WorkerId, events: WorkerEvents) -> Result<Box<dyn WorkerLink>> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        // Checker processes the worker starts join its group and die with it
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            Error::command_execution(
                self.program.display().to_string(),
                self.args.clone(),
                format!("Failed to start worker process: {e}"),
                None,
            )
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::worker_spawn(format!("{id} has no stdin pipe")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::worker_spawn(format!("{id} has no stdout pipe")))?;
        let pid = child.id();
        tracing::debug!(worker = %id, ?pid, "Spawned worker process");

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(write_requests(stdin, request_rx));
        tokio::spawn(async move {
            let reader = tokio::spawn(read_reports(stdout, events.clone()));

            // A dropped link counts as a kill request
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let status = match exited {
                Some(status) => status,
                None => {
                    kill_process_group(pid);
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            // Whatever the worker left running goes with it
            kill_process_group(pid);

            let _ = tokio::time::timeout(DRAIN_TIMEOUT, reader).await;
            let exit = match status {
                Ok(status) => WorkerExit::from_status(&status),
                Err(e) => WorkerExit::default().with_detail(format!("wait failed: {e}")),
            };
            events.exited(exit);
        });

        Ok(Box::new(ProcessLink {
            requests: request_tx,
            kill: Some(kill_tx),
        }))
    }

    fn describe(&self) -> String {
        format!("process {}", self.program.display())
    }
}

struct ProcessLink {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    kill: Option<oneshot::Sender<()>>,
}

impl WorkerLink for ProcessLink {
    fn send(&mut self, request: WorkerRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| Error::protocol("worker process input is closed"))
    }

    fn shutdown(&mut self) {
        let _ = self.requests.send(WorkerRequest::Shutdown);
    }

    fn kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: kill(2) has no memory effects; a negative pid addresses the group
    unsafe {
        libc::kill(-pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

async fn write_requests(mut stdin: ChildStdin, mut requests: mpsc::UnboundedReceiver<WorkerRequest>) {
    while let Some(request) = requests.recv().await {
        let line = match protocol::encode(&request) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Dropping unencodable worker request");
                continue;
            }
        };
        if stdin.write_all(line.as_bytes()).await.is_err() || stdin.flush().await.is_err() {
            break;
        }
    }
}

async fn read_reports(stdout: ChildStdout, events: WorkerEvents) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match protocol::decode_report(&line) {
                Ok(report) => {
                    if !events.report(report) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(worker = %events.worker(), error = %e, "Ignoring worker output");
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(worker = %events.worker(), error = %e, "Worker stdout closed");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::worker::{WorkerEvent, WorkerMessage, WorkerReport};

    async fn next(rx: &mut mpsc::UnboundedReceiver<WorkerMessage>) -> WorkerEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("worker event in time")
            .expect("channel open")
            .event
    }

    fn shell(script: &str) -> ProcessLauncher {
        ProcessLauncher::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_reports_are_forwarded_before_exit() {
        let launcher = shell(r#"echo '{"type":"ready"}'; echo 'noise'; exit 3"#);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _link = launcher
            .launch(WorkerId(1), WorkerEvents::new(WorkerId(1), tx))
            .unwrap();

        assert!(matches!(next(&mut rx).await, WorkerEvent::Report(WorkerReport::Ready)));
        match next(&mut rx).await {
            WorkerEvent::Exited(exit) => assert_eq!(exit.code, Some(3)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_kill_reports_signal() {
        let launcher = shell(r#"echo '{"type":"ready"}'; sleep 30"#);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut link = launcher
            .launch(WorkerId(2), WorkerEvents::new(WorkerId(2), tx))
            .unwrap();
        next(&mut rx).await;

        link.kill();
        match next(&mut rx).await {
            WorkerEvent::Exited(exit) => assert_eq!(exit.signal, Some(9)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[cfg(target_os = "linux")]
    fn alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z' && state != 'X'),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_kill_takes_checker_processes_down() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("checker.pid");
        let launcher = ProcessLauncher::new("sh")
            .arg("-c")
            .arg(r#"sleep 3171 & echo $! > "$1"; echo '{"type":"ready"}'; wait"#)
            .arg("worker")
            .arg(pid_file.to_string_lossy());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut link = launcher
            .launch(WorkerId(4), WorkerEvents::new(WorkerId(4), tx))
            .unwrap();
        assert!(matches!(next(&mut rx).await, WorkerEvent::Report(WorkerReport::Ready)));

        let checker: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(alive(checker));

        link.kill();
        assert!(matches!(next(&mut rx).await, WorkerEvent::Exited(_)));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while alive(checker) && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive(checker), "checker {checker} outlived its worker");
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let launcher = ProcessLauncher::new("/nonexistent/crosscheck-worker");
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = launcher.launch(WorkerId(3), WorkerEvents::new(WorkerId(3), tx));
        assert!(result.is_err());
    }
}
