//! Content digests for cache validation
//!
//! The digest only decides whether a cached oracle result may be reused, so a
//! fast non-cryptographic hash is enough: a mismatch just means recomputing.

use xxhash_rust::xxh3::xxh3_64;

/// Stable digest of fixture content as 16 lower-case hex characters
pub fn content_hash(content: &[u8]) -> String {
    format!("{:016x}", xxh3_64(content))
}
