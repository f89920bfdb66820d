//! Password stretching: per-user random salt + iterated SHA-256.

use crate::security::digest::{constant_time_eq, random_hex};
use sha2::{Digest, Sha256};

/// Salt byte length for password hashing.
const SALT_BYTES: usize = 16;

/// Number of SHA-256 iterations for password stretching.
const HASH_ITERATIONS: u32 = 100_000;

/// Fixed salt used to burn the same time for unknown users.
const DUMMY_SALT: &str = "00000000000000000000000000000000";

pub fn generate_salt() -> String {
    random_hex(SALT_BYTES)
}

/// Hash a password with salt using iterated SHA-256.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hash = Sha256::new();
    hash.update(salt.as_bytes());
    hash.update(password.as_bytes());
    let mut result = hash.finalize();

    for _ in 1..HASH_ITERATIONS {
        let mut h = Sha256::new();
        h.update(result);
        h.update(salt.as_bytes());
        result = h.finalize();
    }

    hex::encode(result)
}

pub fn verify_password(password: &str, salt: &str, stored_hash: &str) -> bool {
    let attempt = hash_password(password, salt);
    constant_time_eq(attempt.as_bytes(), stored_hash.as_bytes())
}

/// Same cost as a real verification; result discarded.
pub fn burn_dummy_hash(password: &str) {
    let _ = hash_password(password, DUMMY_SALT);
}
