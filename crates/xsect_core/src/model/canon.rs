//! Canonical content encoding and digests for shared graph nodes.
//!
//! # Responsibility
//! - Produce one stable byte encoding per JSON-equal value.
//! - Derive hex digests used as node identity keys.
//!
//! # Invariants
//! - JSON object keys encode in sorted order, so key order in the source
//!   document never changes a digest.
//! - Array order is significant and preserved.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Returns the lowercase hex SHA-256 digest of the canonical JSON encoding
/// of `value`.
pub fn canonical_digest<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let encoded = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(hex::encode(hasher.finalize()))
}
