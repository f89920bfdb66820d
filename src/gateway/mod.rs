//! Axum-based HTTP gateway for the pairing protocol.
//!
//! - JSON routes for availability, registration, login, device re-verification
//!   and session lookup
//! - `/ws` duplex channel for desktop pages (see [`ws`])
//! - Request body size limit (64KB) and request timeout (30s)
//! - Sliding-window rate limiting on `/login` and `/accept`
//! - Background sweep of expired pairing bindings

pub mod ws;

use crate::config::Config;
use crate::error::{PairingError, Result as PairingResult};
use crate::security::fingerprint::Fingerprint;
use crate::service::PairingService;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (64KB) — prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Sliding window used by gateway rate limiting.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// How often the rate limiter sweeps stale client entries from its map.
const RATE_LIMITER_SWEEP_INTERVAL_SECS: u64 = 300; // 5 minutes

#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    limit_per_window: u32,
    window: Duration,
    requests: Mutex<(HashMap<String, Vec<Instant>>, Instant)>,
}

impl SlidingWindowRateLimiter {
    pub fn new(limit_per_window: u32, window: Duration) -> Self {
        Self {
            limit_per_window,
            window,
            requests: Mutex::new((HashMap::new(), Instant::now())),
        }
    }

    /// Record a request for `key`. When over the limit, returns how long
    /// until the oldest request in the window falls out of it.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        if self.limit_per_window == 0 {
            return Ok(());
        }

        let now = Instant::now();
        let cutoff = now.checked_sub(self.window).unwrap_or_else(Instant::now);

        let mut guard = self.requests.lock();
        let (requests, last_sweep) = &mut *guard;

        // Periodic sweep: remove clients with no recent requests
        if last_sweep.elapsed() >= Duration::from_secs(RATE_LIMITER_SWEEP_INTERVAL_SECS) {
            requests.retain(|_, timestamps| {
                timestamps.retain(|t| *t > cutoff);
                !timestamps.is_empty()
            });
            *last_sweep = now;
        }

        let entry = requests.entry(key.to_owned()).or_default();
        entry.retain(|instant| *instant > cutoff);

        if entry.len() >= self.limit_per_window as usize {
            let oldest = entry.first().copied().unwrap_or(now);
            return Err(self.window.saturating_sub(now.duration_since(oldest)));
        }

        entry.push(now);
        Ok(())
    }
}

fn client_key_from_headers(headers: &HeaderMap) -> String {
    for header_name in ["X-Forwarded-For", "X-Real-IP"] {
        if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
            let first = value.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return first.to_owned();
            }
        }
    }
    "unknown".into()
}

/// True when `host` is not a loopback address.
pub fn is_public_bind(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => !ip.is_loopback(),
        Err(_) => true,
    }
}

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PairingService>,
    /// Applies to `/login` and `/accept`.
    pub rate_limiter: Arc<SlidingWindowRateLimiter>,
}

impl AppState {
    pub fn new(service: Arc<PairingService>, login_rate_limit_per_minute: u32) -> Self {
        Self {
            service,
            rate_limiter: Arc::new(SlidingWindowRateLimiter::new(
                login_rate_limit_per_minute,
                Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            )),
        }
    }

    fn rate_limit(&self, headers: &HeaderMap) -> PairingResult<()> {
        let key = client_key_from_headers(headers);
        self.rate_limiter.check(&key).map_err(|wait| {
            tracing::warn!(client = %key, "Rate limit exceeded");
            PairingError::RateLimited {
                retry_after_secs: wait.as_secs().max(1),
            }
        })
    }
}

/// Build the router with all routes and middleware layers.
pub fn router(state: AppState) -> Router {
    // ── CORS — desktop pages and mobile browsers call from any origin ──
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/", get(handle_welcome))
        .route("/health", get(handle_health))
        .route("/isAvailable", post(handle_is_available))
        .route("/register", post(handle_register))
        .route("/login", post(handle_login))
        .route("/accept", post(handle_accept))
        .route("/session", get(handle_session))
        .route("/ws", get(ws::handle_ws))
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Bind `host:port`. `host` may be a hostname (`localhost`) or a bare
/// IPv4/IPv6 address.
pub async fn bind_listener(host: &str, port: u16) -> Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))
}

/// Serve `state` on an already-bound listener until shutdown.
///
/// Spawns the periodic sweep of expired pairing bindings and pending logins.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    sweep_interval: Duration,
) -> Result<()> {
    let service = Arc::clone(&state.service);
    let sweep = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let cleared = service.registry().sweep_expired();
            if cleared > 0 {
                tracing::debug!(cleared, "Swept expired pairing bindings");
            }
            let dropped = service.sweep_expired_logins();
            if dropped > 0 {
                tracing::debug!(dropped, "Swept expired pending logins");
            }
        }
    });

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweep.abort();
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Run the gateway from a resolved configuration.
pub async fn run_gateway(config: Config) -> Result<()> {
    let host = config.gateway.host.as_str();
    let port = config.gateway.port;

    // ── Security: refuse public bind without explicit opt-in ──
    if is_public_bind(host) && !config.gateway.allow_public_bind {
        anyhow::bail!(
            "Refusing to bind to {host}: the pairing gateway would be exposed to the network.\n\
             Fix: use --host 127.0.0.1 (default) or set\n\
             [gateway] allow_public_bind = true in config.toml."
        );
    }

    let db_path = config.db_path();
    let store = crate::auth::SqliteUserStore::open(&db_path)?;
    tracing::info!(path = %db_path.display(), "User store opened");

    let binding_ttl = Duration::from_secs(config.pairing.binding_ttl_secs);
    let registry = Arc::new(crate::pairing::ConnectionRegistry::new(binding_ttl));
    let service = PairingService::new(Arc::new(store), registry)
        .with_session_ttl(Duration::from_secs(config.auth.session_ttl_secs))
        .with_login_ttl(binding_ttl);
    let state = AppState::new(
        Arc::new(service),
        config.gateway.login_rate_limit_per_minute,
    );

    let listener = bind_listener(host, port).await?;
    let actual = listener.local_addr()?;
    tracing::info!(
        addr = %actual,
        binding_ttl_secs = config.pairing.binding_ttl_secs,
        "Pairing gateway listening"
    );

    serve(
        listener,
        state,
        Duration::from_secs(config.pairing.sweep_interval_secs.max(1)),
    )
    .await
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

type ApiResponse = PairingResult<Json<Value>>;

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> PairingResult<T> {
    body.map(|Json(inner)| inner)
        .map_err(|rejection| PairingError::validation(rejection.body_text()))
}

/// Run a service call on the blocking pool. Password hashing and SQLite
/// writes must not hold up the async workers that drive channel sockets.
async fn run_blocking<T, F>(state: &AppState, call: F) -> PairingResult<T>
where
    T: Send + 'static,
    F: FnOnce(&PairingService) -> PairingResult<T> + Send + 'static,
{
    let service = Arc::clone(&state.service);
    tokio::task::spawn_blocking(move || call(&service))
        .await
        .map_err(|e| PairingError::Internal(e.into()))?
}

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[derive(Debug, Deserialize)]
struct AvailabilityBody {
    username: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    username: Option<String>,
    password: Option<String>,
    email: Option<String>,
    fingerprint: Option<Fingerprint>,
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AcceptBody {
    username: Option<String>,
    fingerprint: Option<Fingerprint>,
}

/// GET /
async fn handle_welcome() -> Json<Value> {
    Json(json!({"success": true, "message": "Welcome to the API"}))
}

/// GET /health — always public (no secrets leaked)
async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let registry = state.service.registry();
    Json(json!({
        "status": "ok",
        "connections": registry.connection_count(),
        "bound": registry.bound_count(),
    }))
}

/// POST /isAvailable — username (and optionally email) availability.
async fn handle_is_available(
    State(state): State<AppState>,
    body: Result<Json<AvailabilityBody>, JsonRejection>,
) -> ApiResponse {
    let body = json_body(body)?;
    let username = crate::auth::validate::required("Username", body.username.as_deref())?;
    let email = body
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty());

    let available = state.service.check_availability(username, email)?;
    let message = if available {
        "Username is available"
    } else {
        "Username is not available"
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "available": available,
    })))
}

/// POST /register — create the account and notify the desktop channel.
async fn handle_register(
    State(state): State<AppState>,
    body: Result<Json<RegisterBody>, JsonRejection>,
) -> ApiResponse {
    use crate::auth::validate::required;

    let body = json_body(body)?;
    let username = required("Username", body.username.as_deref())?.to_string();
    let password = required("Password", body.password.as_deref())?.to_string();
    let email = required("Email", body.email.as_deref())?.to_string();
    let fingerprint = body.fingerprint;

    let registration = run_blocking(&state, move |service| {
        service.register(&username, &password, &email, fingerprint)
    })
    .await?;
    Ok(Json(json!({
        "success": true,
        "message": "User registered",
        "delivered": registration.delivery.is_delivered(),
    })))
}

/// POST /login — verify credentials and return the login pairing token.
async fn handle_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<LoginBody>, JsonRejection>,
) -> ApiResponse {
    use crate::auth::validate::required;

    state.rate_limit(&headers)?;
    let body = json_body(body)?;
    let username = required("Username", body.username.as_deref())?.to_string();
    let password = required("Password", body.password.as_deref())?.to_string();

    let token = run_blocking(&state, move |service| {
        service.authenticate(&username, &password)
    })
    .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Credentials verified",
        "token": token,
    })))
}

/// POST /accept — re-verify the device and push the session to the desktop.
///
/// The session token itself only travels over the duplex channel.
async fn handle_accept(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AcceptBody>, JsonRejection>,
) -> ApiResponse {
    state.rate_limit(&headers)?;
    let body = json_body(body)?;
    let username =
        crate::auth::validate::required("Username", body.username.as_deref())?.to_string();
    let fingerprint = body
        .fingerprint
        .ok_or_else(|| PairingError::validation("Fingerprint is required"))?;

    let issued = run_blocking(&state, move |service| {
        service.reverify(&username, &fingerprint)
    })
    .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Device verified",
        "delivered": issued.delivery.is_delivered(),
    })))
}

/// GET /session — the user behind a session token.
async fn handle_session(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let token = extract_bearer_token(&headers).ok_or(PairingError::NotFound("Session"))?;
    let user = state.service.session_user(token)?;
    Ok(Json(json!({
        "success": true,
        "message": "Session is valid",
        "user": user,
    })))
}
