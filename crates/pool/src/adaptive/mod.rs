//! Resource limits recomputed from what the pool observes at run time

mod memory;
mod timeout;

pub use memory::{AdaptiveMemoryBudget, MemoryPolicy};
pub use timeout::{AdaptiveTimeout, TimeoutPolicy};
