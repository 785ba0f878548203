//! Supervised pool of isolated workers running the implementation under test
//!
//! The pool keeps a fixed number of worker slots busy, enforces an adaptive
//! per-check deadline, and replaces workers that crash, exhaust memory, time
//! out or reach their recycling budget.

pub mod adaptive;
pub mod classify;
pub mod config;
pub mod pool;
pub mod worker;

pub use adaptive::{AdaptiveMemoryBudget, AdaptiveTimeout, MemoryPolicy, TimeoutPolicy};
pub use classify::{classify_exit, WorkerExit};
pub use config::{parse_timeout, PoolConfig};
pub use pool::{PoolHealth, PoolSnapshot, WorkerPool};
pub use worker::{
    serve, ProcessLauncher, ThreadLauncher, WorkerEvents, WorkerId, WorkerLauncher, WorkerLink,
};
