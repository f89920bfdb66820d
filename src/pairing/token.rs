//! Pairing token derivations.
//!
//! Both sides of a QR flow compute the same token independently and the
//! registry matches them by string equality; tokens are never stored.
//!
//! - Registration: `sha256(username ":" email REGISTRATION_DOMAIN)`. Pure
//!   function of public inputs, so the desktop can bind before the account
//!   exists.
//! - Login: `sha256(secret "/" username "/" user_id)`. The per-process
//!   [`ServerSecret`] keeps the token unpredictable even though username and
//!   user id are knowable.

use crate::security::digest::{digest_parts, random_hex};
use serde::{Deserialize, Serialize};

/// Domain separator appended to registration token input.
pub const REGISTRATION_DOMAIN: &str = "#qr2fa/register";

/// Secret byte length before hex encoding.
const SECRET_BYTES: usize = 32;

/// A derived pairing digest. Compared only by equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingToken(String);

impl PairingToken {
    /// Wrap a token received from a client. No format check: a token that
    /// was never derived simply never matches.
    pub fn from_client(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters only, for logs.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for PairingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random value generated once per process and never persisted or sent.
pub struct ServerSecret(String);

impl ServerSecret {
    pub fn generate() -> Self {
        Self(random_hex(SECRET_BYTES))
    }

    #[cfg(test)]
    pub(crate) fn fixed(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Debug for ServerSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ServerSecret(<redacted>)")
    }
}

/// Token the registering party and the desktop page both derive from the
/// pending account's username and email.
pub fn registration_token(username: &str, email: &str) -> PairingToken {
    PairingToken(digest_parts(&[
        username.as_bytes(),
        b":",
        email.as_bytes(),
        REGISTRATION_DOMAIN.as_bytes(),
    ]))
}

/// Token handed out after a successful credential check.
pub fn login_token(secret: &ServerSecret, username: &str, user_id: &str) -> PairingToken {
    PairingToken(digest_parts(&[
        secret.0.as_bytes(),
        b"/",
        username.as_bytes(),
        b"/",
        user_id.as_bytes(),
    ]))
}
