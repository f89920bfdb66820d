//! Cryptographic helpers and device fingerprint comparison.

pub mod digest;
pub mod fingerprint;

pub use digest::{constant_time_eq, digest_parts, digest_str};
pub use fingerprint::{Fingerprint, FingerprintMatcher, MatchOutcome, StrictMatcher};
