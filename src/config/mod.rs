//! Configuration: TOML file + environment overrides.
//!
//! Resolution order (later wins): built-in defaults, `config.toml`,
//! environment (`PORT`, `QR2FA_HOST`, `QR2FA_DB_PATH`), CLI flags (applied
//! by `main`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
}

/// `[gateway]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow binding a non-loopback address.
    #[serde(default)]
    pub allow_public_bind: bool,
    /// Requests per minute per client on `/login` and `/accept` (0 = unlimited).
    #[serde(default = "default_login_rate_limit")]
    pub login_rate_limit_per_minute: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allow_public_bind: false,
            login_rate_limit_per_minute: default_login_rate_limit(),
        }
    }
}

/// `[auth]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// SQLite file; defaults to the platform data directory.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Session lifetime in seconds (0 = sessions never expire).
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            session_ttl_secs: default_session_ttl(),
        }
    }
}

/// `[pairing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    /// Lifetime of a channel's token binding.
    #[serde(default = "default_binding_ttl")]
    pub binding_ttl_secs: u64,
    /// How often expired bindings are swept.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            binding_ttl_secs: default_binding_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_login_rate_limit() -> u32 {
    20
}
fn default_session_ttl() -> u64 {
    30 * 24 * 3600
}
fn default_binding_ttl() -> u64 {
    crate::pairing::registry::DEFAULT_BINDING_TTL_SECS
}
fn default_sweep_interval() -> u64 {
    60
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "qr2fa")
}

impl Config {
    /// Default config file location (`<config dir>/qr2fa/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path` (or the default location). A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) => p,
            None => return Ok(Self::default()),
        };

        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::info!(path = %path.display(), "loading config file");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `PORT`, `QR2FA_HOST` and `QR2FA_DB_PATH` from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(port) = non_empty("PORT") {
            self.gateway.port = port
                .parse()
                .with_context(|| format!("PORT is not a valid port: {port}"))?;
        }
        if let Some(host) = non_empty("QR2FA_HOST") {
            self.gateway.host = host;
        }
        if let Some(db) = non_empty("QR2FA_DB_PATH") {
            self.auth.db_path = Some(PathBuf::from(db));
        }
        Ok(())
    }

    /// Resolved user database path.
    pub fn db_path(&self) -> PathBuf {
        self.auth.db_path.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.data_dir().join("users.db"))
                .unwrap_or_else(|| PathBuf::from("users.db"))
        })
    }
}
