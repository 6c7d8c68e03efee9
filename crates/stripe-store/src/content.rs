//! Content addressing and hash-slot mapping.
//!
//! Every payload in the cluster — whole files, stripes, and erasure-coded
//! chunks — is addressed by its lowercase-hex SHA-256 digest. Placement maps
//! a content identifier onto one of [`SLOT_COUNT`] ring slots by reducing the
//! digest, read as a single big-endian integer, modulo the slot count.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Total number of hash slots in the placement ring.
pub const SLOT_COUNT: u32 = 16384;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentIdError {
    #[error("content id is empty")]
    Empty,
    #[error("invalid hex digit {0:?} in content id")]
    InvalidHexDigit(char),
}

/// Lowercase-hex SHA-256 digest of `bytes`.
pub fn content_id(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Map a content identifier to its hash slot.
///
/// The digest is 256 bits, so the reduction folds digit-by-digit (Horner)
/// rather than parsing into a fixed-width integer; a 64-bit parse would
/// truncate the digest and bias the ring.
pub fn slot_of(content_id: &str) -> Result<u32, ContentIdError> {
    if content_id.is_empty() {
        return Err(ContentIdError::Empty);
    }
    let mut acc: u32 = 0;
    for ch in content_id.chars() {
        let digit = ch
            .to_digit(16)
            .ok_or(ContentIdError::InvalidHexDigit(ch))?;
        acc = (acc * 16 + digit) % SLOT_COUNT;
    }
    Ok(acc)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
