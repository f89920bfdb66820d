//! qr2fa: QR-initiated cross-device pairing.
//!
//! A desktop page opens a WebSocket and announces a pairing token; a mobile
//! browser registers or logs in over HTTP, its device fingerprint is checked
//! against the enrolled one, and the resulting session is pushed to the
//! desktop channel bound to the matching token.

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod pairing;
pub mod security;
pub mod service;

pub use config::Config;
pub use error::{PairingError, Result};
pub use service::PairingService;
