//! Core domain types, errors, and constants for crosscheck.
//!
//! ## Key Components
//!
//! - **`errors`**: the primary `Error` enum and `Result` alias. Per-task
//!   failures are modelled as values elsewhere; this type is reserved for
//!   failures that stop an operation.
//! - **`types`**: `Task`, the `Oracle` / `Candidate` contracts, and the
//!   outcome of a candidate run.
//! - **`constants`**: environment variable names and shared defaults.

pub mod constants;
pub mod errors;
pub mod types;

pub use self::{
    constants::*,
    errors::{Error, Result},
    types::*,
};
