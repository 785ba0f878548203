//! Line-delimited JSON spoken between the pool and process workers
//!
//! Each message is one JSON object followed by `\n`. Requests flow to the
//! worker on stdin, reports flow back on stdout. Anything else a worker
//! prints belongs on stderr.

use crate::classify::WorkerExit;
use crosscheck_core::{Configuration, Error, Result, SourceFragment};
use serde::{Deserialize, Serialize};

/// Message from the pool to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    Check {
        seq: u64,
        fragments: Vec<SourceFragment>,
        configuration: Configuration,
    },
    Shutdown,
}

/// What a single check produced inside the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckResult {
    Codes { codes: Vec<u32> },
    Failed {
        detail: String,
        /// How the checker process ended, when the check ran one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit: Option<WorkerExit>,
    },
}

impl CheckResult {
    /// A failed check, keeping the exit status of a checker process that died
    pub fn failed(error: &Error) -> Self {
        let detail = error.to_string();
        let exit = match error {
            Error::CommandExecution {
                exit_code, signal, ..
            } if exit_code.is_some() || signal.is_some() => Some(WorkerExit {
                code: *exit_code,
                signal: *signal,
                detail: Some(detail.clone()),
            }),
            _ => None,
        };
        CheckResult::Failed { detail, exit }
    }
}

/// Message from a worker to the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReport {
    Ready,
    Finished {
        seq: u64,
        result: CheckResult,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memory_bytes: Option<u64>,
    },
    Heartbeat {
        memory_bytes: u64,
    },
}

/// Serialize one message as a protocol line, newline included
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| Error::json("Failed to encode worker message", e))?;
    line.push('\n');
    Ok(line)
}

pub fn decode_request(line: &str) -> Result<WorkerRequest> {
    serde_json::from_str(line.trim())
        .map_err(|e| Error::protocol(format!("invalid worker request: {e}")))
}

pub fn decode_report(line: &str) -> Result<WorkerReport> {
    serde_json::from_str(line.trim())
        .map_err(|e| Error::protocol(format!("invalid worker report: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = WorkerRequest::Check {
            seq: 3,
            fragments: vec![SourceFragment::new("a.ts", "let x = 1;")],
            configuration: Configuration::new().with("strict", "true"),
        };
        let line = encode(&request).unwrap();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "check");
        assert_eq!(value["configuration"]["strict"], "true");
        assert_eq!(decode_request(&line).unwrap(), request);
    }

    #[test]
    fn test_report_wire_shape() {
        let report = WorkerReport::Finished {
            seq: 1,
            result: CheckResult::Codes { codes: vec![2322] },
            memory_bytes: None,
        };
        let line = encode(&report).unwrap();
        assert_eq!(
            line,
            "{\"type\":\"finished\",\"seq\":1,\"result\":{\"status\":\"codes\",\"codes\":[2322]}}\n"
        );
        assert_eq!(decode_report("{\"type\":\"ready\"}").unwrap(), WorkerReport::Ready);
    }

    #[test]
    fn test_failed_check_carries_exit_status() {
        let killed = Error::CommandExecution {
            command: "tsc".into(),
            args: vec![],
            message: "no output".into(),
            exit_code: None,
            signal: Some(9),
        };
        let line = encode(&WorkerReport::Finished {
            seq: 4,
            result: CheckResult::failed(&killed),
            memory_bytes: None,
        })
        .unwrap();
        match decode_report(&line).unwrap() {
            WorkerReport::Finished {
                result: CheckResult::Failed { exit: Some(exit), .. },
                ..
            } => assert_eq!(exit.signal, Some(9)),
            other => panic!("unexpected report {other:?}"),
        }

        let plain = CheckResult::failed(&Error::configuration("bad input"));
        assert!(matches!(plain, CheckResult::Failed { exit: None, .. }));
    }

    #[test]
    fn test_garbage_is_protocol_error() {
        let err = decode_report("warning: something printed to stdout").unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }
}
