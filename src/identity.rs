//! Natural key to point id mapping.
//!
//! The vector store addresses points by a non-negative 63-bit integer. Deriving
//! that integer from the paper's natural key makes every upsert idempotent: the
//! same paper always lands on the same point.
//!
//! The mapping is MD5 over the UTF-8 key, the first 16 hex digits of the digest
//! read as an unsigned 64-bit integer, reduced modulo `2^63 - 1`. Any other
//! implementation using the same hash and truncation width produces the same ids,
//! so collections built elsewhere stay addressable.
//!
//! Distinct keys can collide. A collision silently overwrites the earlier point;
//! no detection is attempted.

use md5::{Digest, Md5};

/// Upper bound (exclusive) of the id domain: `2^63 - 1`.
pub const POINT_ID_MODULUS: u64 = i64::MAX as u64;

/// Derive the vector-store point id for a paper's natural key.
///
/// Total over all strings, including the empty string.
pub fn point_id(paper_id: &str) -> u64 {
    let digest = Md5::digest(paper_id.as_bytes());
    // First 8 digest bytes big-endian == first 16 hex digits of the hex digest.
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % POINT_ID_MODULUS
}
