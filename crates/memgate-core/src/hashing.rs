//! Hashing Utilities

use sha2::{Digest, Sha256};

use crate::text::normalize;

/// Compute SHA-256 hash of content and return as hex string.
///
/// Content is normalized first (case folded, whitespace collapsed) so that
/// trivially re-formatted copies of the same text hash identically.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(content).as_bytes());
    hex::encode(hasher.finalize())
}
