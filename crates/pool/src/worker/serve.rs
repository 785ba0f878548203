//! The worker side of the process protocol

use super::protocol::{self, CheckResult, WorkerReport, WorkerRequest};
use crosscheck_core::{Candidate, Error, Result};
use crosscheck_utils::memory::SystemMemory;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::MissedTickBehavior;

/// Answer check requests from `input` until shutdown or end of input
///
/// Memory reported with results and heartbeats comes from the candidate when
/// it can tell, otherwise from this process's resident set. A candidate panic
/// is resumed so the process dies and the pool sees the crash.
pub async fn serve<R, W>(
    candidate: Arc<dyn Candidate>,
    input: R,
    mut output: W,
    heartbeat: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let system = SystemMemory::new();
    let memory = |candidate: &dyn Candidate| {
        candidate
            .memory_usage()
            .or_else(|| system.current_process_bytes())
    };

    send(&mut output, &WorkerReport::Ready).await?;

    let mut lines = BufReader::new(input).lines();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.map_err(|e| Error::protocol(format!("failed to read request: {e}")))?;
                let Some(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let (seq, fragments, configuration) = match protocol::decode_request(&line)? {
                    WorkerRequest::Shutdown => break,
                    WorkerRequest::Check { seq, fragments, configuration } => (seq, fragments, configuration),
                };

                let worker_candidate = Arc::clone(&candidate);
                let joined = tokio::task::spawn_blocking(move || {
                    worker_candidate.check(&fragments, &configuration)
                })
                .await;
                let result = match joined {
                    Ok(Ok(codes)) => CheckResult::Codes { codes },
                    Ok(Err(e)) => CheckResult::failed(&e),
                    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Err(e) => CheckResult::Failed { detail: e.to_string(), exit: None },
                };

                let report = WorkerReport::Finished {
                    seq,
                    result,
                    memory_bytes: memory(candidate.as_ref()),
                };
                send(&mut output, &report).await?;
            }
            _ = ticker.tick() => {
                if let Some(memory_bytes) = memory(candidate.as_ref()) {
                    send(&mut output, &WorkerReport::Heartbeat { memory_bytes }).await?;
                }
            }
        }
    }

    tracing::debug!("Worker loop finished");
    Ok(())
}

async fn send<W: AsyncWrite + Unpin>(output: &mut W, report: &WorkerReport) -> Result<()> {
    let line = protocol::encode(report)?;
    output
        .write_all(line.as_bytes())
        .await
        .map_err(|e| Error::protocol(format!("failed to write report: {e}")))?;
    output
        .flush()
        .await
        .map_err(|e| Error::protocol(format!("failed to flush report: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosscheck_core::{Configuration, SourceFragment};
    use tokio::io::{duplex, AsyncBufReadExt};

    struct Fixed;

    impl Candidate for Fixed {
        fn check(&self, fragments: &[SourceFragment], _: &Configuration) -> Result<Vec<u32>> {
            if fragments.is_empty() {
                return Err(Error::configuration("no input"));
            }
            Ok(vec![1005, 2304])
        }

        fn memory_usage(&self) -> Option<u64> {
            Some(1024)
        }
    }

    #[tokio::test]
    async fn test_serve_answers_requests_in_order() {
        let (mut pool_side, worker_side) = duplex(64 * 1024);
        let (worker_in, worker_out) = tokio::io::split(worker_side);
        let server = tokio::spawn(serve(
            Arc::new(Fixed),
            worker_in,
            worker_out,
            Duration::from_secs(3600),
        ));

        let requests = [
            WorkerRequest::Check {
                seq: 1,
                fragments: vec![SourceFragment::new("a.ts", "x")],
                configuration: Configuration::new(),
            },
            WorkerRequest::Check {
                seq: 2,
                fragments: Vec::new(),
                configuration: Configuration::new(),
            },
            WorkerRequest::Shutdown,
        ];
        for request in &requests {
            pool_side
                .write_all(protocol::encode(request).unwrap().as_bytes())
                .await
                .unwrap();
        }

        server.await.unwrap().unwrap();

        let mut lines = BufReader::new(pool_side).lines();
        let mut reports = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            reports.push(protocol::decode_report(&line).unwrap());
        }

        assert_eq!(reports[0], WorkerReport::Ready);
        assert_eq!(
            reports[1],
            WorkerReport::Finished {
                seq: 1,
                result: CheckResult::Codes { codes: vec![1005, 2304] },
                memory_bytes: Some(1024),
            }
        );
        assert!(matches!(
            &reports[2],
            WorkerReport::Finished { seq: 2, result: CheckResult::Failed { .. }, .. }
        ));
        assert_eq!(reports.len(), 3);
    }

    #[tokio::test]
    async fn test_heartbeat_reports_memory() {
        let (pool_side, worker_side) = duplex(64 * 1024);
        let (worker_in, worker_out) = tokio::io::split(worker_side);
        let server = tokio::spawn(serve(
            Arc::new(Fixed),
            worker_in,
            worker_out,
            Duration::from_millis(10),
        ));

        let mut lines = BufReader::new(pool_side).lines();
        assert_eq!(
            protocol::decode_report(&lines.next_line().await.unwrap().unwrap()).unwrap(),
            WorkerReport::Ready
        );
        assert_eq!(
            protocol::decode_report(&lines.next_line().await.unwrap().unwrap()).unwrap(),
            WorkerReport::Heartbeat { memory_bytes: 1024 }
        );
        server.abort();
    }
}
