//! Shared utilities for crosscheck
//!
//! Small helpers used by several crates in the workspace: atomic file
//! writes, memory readings, and logging setup.

pub mod atomic_file;
pub mod memory;
pub mod tracing;

pub use atomic_file::*;
pub use memory::*;
