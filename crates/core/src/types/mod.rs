//! Core domain types for crosscheck.
//!
//! - **`task`**: the immutable unit of work produced by the task source
//! - **`check`**: inputs handed to an implementation and the `Oracle` /
//!   `Candidate` contracts
//! - **`outcome`**: what a candidate run resolved to

pub mod check;
pub mod outcome;
pub mod task;

pub use check::*;
pub use outcome::*;
pub use task::*;
