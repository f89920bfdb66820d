//! Error taxonomy for the pairing protocol and its HTTP mapping.
//!
//! Every failure the service can detect is one variant of [`PairingError`].
//! Handlers return `Result<_, PairingError>` and the single
//! [`IntoResponse`] impl below turns a failure into the stable
//! `{ "success": false, "message": "..." }` shape.
//!
//! A delivery miss (no channel bound to the token when the result is ready)
//! is not an error: see [`crate::pairing::registry::Delivery`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

pub type Result<T, E = PairingError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    /// Malformed or missing input. Never retried.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Username or email already registered.
    #[error("{0} is already taken")]
    Conflict(&'static str),

    /// Unknown user or session token.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Password did not verify.
    #[error("Invalid username or password")]
    Credential,

    /// Submitted fingerprint differs from the enrolled one.
    #[error("Device fingerprint does not match the enrolled device")]
    DeviceMismatch,

    /// The user has no enrolled fingerprint; a device reset is required.
    #[error("No device enrolled for this user")]
    EnrollmentMissing,

    #[error("Too many requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PairingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_)
            | Self::NotFound(_)
            | Self::Credential
            | Self::DeviceMismatch
            | Self::EnrollmentMissing => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client. Storage and internal details stay in the log.
    fn public_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<serde_json::Error> for PairingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl From<crate::pairing::attempt::InvalidTransition> for PairingError {
    fn from(err: crate::pairing::attempt::InvalidTransition) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for PairingError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = Json(serde_json::json!({
            "success": false,
            "message": self.public_message(),
        }));
        (status, body).into_response()
    }
}
