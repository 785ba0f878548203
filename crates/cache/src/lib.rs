//! Result cache for crosscheck
//!
//! Stores oracle output per fixture, keyed by the fixture's relative path and
//! validated three ways before it is trusted: the schema version, the
//! freshness key of the oracle that produced it, and a digest of the fixture
//! content. Any mismatch means "recompute", never an error.

pub mod entry;
pub mod hashing;
pub mod store;

pub use entry::{CacheEntry, CacheFile};
pub use hashing::content_hash;
pub use store::{CacheWriter, LoadOutcome, ResultCache};
