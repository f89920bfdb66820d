//! Request field validation for registration and login.
//!
//! - username: alphanumeric, 4–64 chars
//! - password: alphanumeric, 6–128 chars
//! - email: `local@domain.tld` shape (no TLD allow-list), at most 512 chars

use crate::error::{PairingError, Result};
use regex::Regex;
use std::sync::LazyLock;

const USERNAME_LEN: (usize, usize) = (4, 64);
const PASSWORD_LEN: (usize, usize) = (6, 128);
const EMAIL_MAX_LEN: usize = 512;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$")
        .unwrap()
});

fn alphanumeric(label: &str, value: &str, (min, max): (usize, usize)) -> Result<()> {
    if value.is_empty() {
        return Err(PairingError::validation(format!("{label} is required")));
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(PairingError::validation(format!(
            "{label} must only contain alpha-numeric characters"
        )));
    }
    let len = value.len();
    if len < min || len > max {
        return Err(PairingError::validation(format!(
            "{label} length must be between {min} and {max} characters"
        )));
    }
    Ok(())
}

pub fn username(value: &str) -> Result<()> {
    alphanumeric("Username", value, USERNAME_LEN)
}

pub fn password(value: &str) -> Result<()> {
    alphanumeric("Password", value, PASSWORD_LEN)
}

pub fn email(value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(PairingError::validation("Email is required"));
    }
    if value.len() > EMAIL_MAX_LEN {
        return Err(PairingError::validation(format!(
            "Email length must be at most {EMAIL_MAX_LEN} characters"
        )));
    }
    if !EMAIL.is_match(value) {
        return Err(PairingError::validation("Email must be a valid email"));
    }
    Ok(())
}

/// Reject absent or blank required fields with a uniform message.
pub fn required<'a>(label: &str, value: Option<&'a str>) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(PairingError::validation(format!("{label} is required"))),
    }
}
