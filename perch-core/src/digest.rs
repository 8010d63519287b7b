//! # Content Digests
//!
//! Integrity primitives for the log: a fixed-width 128-bit content digest
//! used by entry framing and snapshot deduplication, and a CRC32 checksum
//! for per-entry corruption detection in the file-backed log.

use std::fmt;

use crc32fast::Hasher as Crc32Hasher;
use serde::{Deserialize, Serialize};

/// Width of a content digest in bytes.
pub const DIGEST_LEN: usize = 16;

/// A 128-bit content digest (truncated BLAKE3).
///
/// Wide enough for corruption detection and content addressing; the width is
/// a wire constant, changing it invalidates framed entries written by older
/// versions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(pub [u8; DIGEST_LEN]);

impl Digest {
    /// Digest of a byte slice.
    pub fn of(data: &[u8]) -> Self {
        let full = blake3::hash(data);
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(&full.as_bytes()[..DIGEST_LEN]);
        Digest(out)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", hex::encode(self.0))
    }
}

/// Fast CRC32 checksum for data integrity
pub fn crc32_checksum(data: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Verify CRC32 checksum
pub fn verify_crc32(data: &[u8], expected: u32) -> bool {
    crc32_checksum(data) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        assert_eq!(Digest::of(b"framework"), Digest::of(b"framework"));
        assert_ne!(Digest::of(b"framework"), Digest::of(b"framework2"));
    }

    #[test]
    fn digest_display_is_hex() {
        let d = Digest::of(b"abc");
        assert_eq!(d.to_string().len(), DIGEST_LEN * 2);
    }

    #[test]
    fn checksums() {
        let data = b"log entry";
        let checksum = crc32_checksum(data);
        assert!(verify_crc32(data, checksum));
        assert!(!verify_crc32(b"tampered", checksum));
    }
}
