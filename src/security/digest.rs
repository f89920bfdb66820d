//! One-way digest primitive shared by pairing tokens, session tokens and
//! password stretching.
//!
//! All digests are SHA-256, hex-encoded (64 lowercase chars).

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Hex length of every digest produced here.
pub const DIGEST_HEX_LEN: usize = 64;

/// SHA-256 of the concatenation of `parts`, hex-encoded.
///
/// Callers put their own separators into `parts`; nothing is inserted
/// between them.
pub fn digest_parts(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

pub fn digest_str(value: &str) -> String {
    digest_parts(&[value.as_bytes()])
}

/// `len` bytes from the OS CSPRNG, hex-encoded.
pub fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_matches_known_vector() {
        assert_eq!(
            digest_str("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn parts_are_concatenated_without_separator() {
        assert_eq!(digest_parts(&[b"ab", b"c"]), digest_str("abc"));
        assert_eq!(digest_parts(&[]).len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn random_hex_has_expected_length_and_varies() {
        let a = random_hex(32);
        let b = random_hex(32);
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn constant_time_eq_works() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
