//! Pairing protocol orchestration.
//!
//! [`PairingService`] ties the user store, the connection registry and the
//! fingerprint matcher together. Handlers in [`crate::gateway`] are thin
//! wrappers over the five operations here:
//!
//! | Operation              | Result                                     |
//! |------------------------|--------------------------------------------|
//! | `check_availability`   | `bool`                                     |
//! | `register`             | new user id + `.registered` delivery       |
//! | `authenticate`         | login [`PairingToken`]                     |
//! | `reverify`             | session token + `.logged<token>` delivery  |
//! | `session_user`         | [`PublicUser`] for a session token         |
//!
//! A missing channel at delivery time is reported through [`Delivery`] and
//! never fails the operation.
//!
//! `reverify` only runs after a successful `authenticate` for the same user:
//! the password check leaves a one-shot pending login that expires after
//! `login_ttl`.

use crate::auth::{password, validate, PublicUser, User, UserStore};
use crate::error::{PairingError, Result};
use crate::pairing::registry::DEFAULT_BINDING_TTL_SECS;
use crate::pairing::{
    login_token, registration_token, ConnectionRegistry, Delivery, LoginAttempt, LoginEvent,
    PairingToken, ServerMessage, ServerSecret,
};
use crate::security::digest::digest_str;
use crate::security::fingerprint::{Fingerprint, FingerprintMatcher, MatchOutcome, StrictMatcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub user_id: String,
    pub delivery: Delivery,
}

/// Outcome of a successful device re-verification.
///
/// `session_token` is what the bound channel received. The HTTP response
/// only reports whether it was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSession {
    pub session_token: String,
    pub delivery: Delivery,
}

pub struct PairingService {
    store: Arc<dyn UserStore>,
    registry: Arc<ConnectionRegistry>,
    matcher: Arc<dyn FingerprintMatcher>,
    secret: ServerSecret,
    /// `None` = sessions never expire.
    session_ttl: Option<Duration>,
    /// User id → expiry of a password check not yet followed by `reverify`.
    pending_logins: Mutex<HashMap<String, Instant>>,
    login_ttl: Duration,
}

impl PairingService {
    /// Service with a fresh per-process secret and the strict matcher.
    pub fn new(store: Arc<dyn UserStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            store,
            registry,
            matcher: Arc::new(StrictMatcher),
            secret: ServerSecret::generate(),
            session_ttl: None,
            pending_logins: Mutex::new(HashMap::new()),
            login_ttl: Duration::from_secs(DEFAULT_BINDING_TTL_SECS),
        }
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn FingerprintMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Session lifetime; zero disables expiry.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    /// How long a verified password stays usable for `reverify`.
    pub fn with_login_ttl(mut self, ttl: Duration) -> Self {
        self.login_ttl = ttl;
        self
    }

    #[cfg(test)]
    fn with_secret(mut self, secret: ServerSecret) -> Self {
        self.secret = secret;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    /// True when neither the username nor (if given) the email is taken.
    pub fn check_availability(&self, username: &str, email: Option<&str>) -> Result<bool> {
        if self.store.username_taken(username)? {
            return Ok(false);
        }
        match email {
            Some(email) => Ok(!self.store.email_taken(email)?),
            None => Ok(true),
        }
    }

    /// Create the account, enroll its fingerprint and notify the desktop
    /// channel bound to the registration token.
    pub fn register(
        &self,
        username: &str,
        password: &str,
        email: &str,
        fingerprint: Option<Fingerprint>,
    ) -> Result<Registration> {
        validate::username(username)?;
        validate::password(password)?;
        validate::email(email)?;

        if self.store.username_taken(username)? {
            return Err(PairingError::Conflict("Username"));
        }
        if self.store.email_taken(email)? {
            return Err(PairingError::Conflict("Email"));
        }

        if fingerprint.is_none() {
            tracing::warn!(username, "Registering without a device fingerprint");
        }

        let salt = password::generate_salt();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password::hash_password(password, &salt),
            salt,
            fingerprint,
            session_token_hash: None,
            session_issued_at: None,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.store.insert(&user)?;
        tracing::info!(username, user_id = %user.id, "User registered");

        let token = registration_token(username, email);
        let delivery = self.registry.deliver(&token, ServerMessage::Registered);
        Ok(Registration {
            user_id: user.id,
            delivery,
        })
    }

    /// Verify the password and hand back the login pairing token.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<PairingToken> {
        validate::username(username)?;
        validate::password(password)?;

        let Some(user) = self.store.find_by_username(username)? else {
            password::burn_dummy_hash(password);
            tracing::debug!(username, "Login for unknown user");
            return Err(PairingError::NotFound("User"));
        };

        if !password::verify_password(password, &user.salt, &user.password_hash) {
            tracing::info!(username, "Login rejected: bad password");
            return Err(PairingError::Credential);
        }

        self.pending_logins
            .lock()
            .insert(user.id.clone(), Instant::now() + self.login_ttl);

        let token = login_token(&self.secret, &user.username, &user.id);
        tracing::info!(username, token = token.short(), "Login token issued");
        Ok(token)
    }

    /// Consume the pending login for `user_id`, if one is still live.
    fn take_pending_login(&self, user_id: &str) -> bool {
        self.pending_logins
            .lock()
            .remove(user_id)
            .is_some_and(|expires_at| expires_at > Instant::now())
    }

    /// Drop pending logins past their lifetime. Returns how many were dropped.
    pub fn sweep_expired_logins(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.pending_logins.lock();
        let before = pending.len();
        pending.retain(|_, expires_at| *expires_at > now);
        before - pending.len()
    }

    /// Compare the submitted fingerprint with the enrolled one and, on a
    /// match, issue a session and push it to the login token's channel.
    pub fn reverify(&self, username: &str, fingerprint: &Fingerprint) -> Result<IssuedSession> {
        validate::username(username)?;

        let Some(mut user) = self.store.find_by_username(username)? else {
            return Err(PairingError::NotFound("User"));
        };

        if !self.take_pending_login(&user.id) {
            tracing::info!(username, "Device verification without a prior login");
            return Err(PairingError::NotFound("Login"));
        }

        let mut attempt = LoginAttempt::new(&user.username);
        attempt.record(LoginEvent::CredentialsVerified)?;

        let outcome = self.matcher.compare(user.fingerprint.as_ref(), fingerprint);
        attempt.record(LoginEvent::FingerprintCompared(outcome))?;
        tracing::info!(
            username,
            matcher = self.matcher.name(),
            %outcome,
            "Fingerprint evaluated"
        );

        if !outcome.is_match() {
            attempt.record(LoginEvent::Refused)?;
            return Err(match outcome {
                MatchOutcome::NoEnrollment => PairingError::EnrollmentMissing,
                _ => PairingError::DeviceMismatch,
            });
        }

        user.fingerprint = None;
        let session_token = digest_str(&serde_json::to_string(&user)?);
        let issued_at = chrono::Utc::now().timestamp();
        self.store
            .set_session(&user.id, &digest_str(&session_token), issued_at)?;
        attempt.record(LoginEvent::SessionPersisted)?;
        tracing::info!(username, user_id = %user.id, "Session issued");

        let token = login_token(&self.secret, &user.username, &user.id);
        let delivery = self
            .registry
            .deliver(&token, ServerMessage::LoggedIn(session_token.clone()));
        attempt.record(LoginEvent::DeliveryAttempted {
            delivered: delivery.is_delivered(),
        })?;
        tracing::debug!(username, stage = ?attempt.stage(), "Login attempt finished");

        Ok(IssuedSession {
            session_token,
            delivery,
        })
    }

    /// The user a session token belongs to, without fingerprint or credential.
    pub fn session_user(&self, session_token: &str) -> Result<PublicUser> {
        let session_token = session_token.trim();
        if session_token.is_empty() {
            return Err(PairingError::NotFound("Session"));
        }

        let user = self
            .store
            .find_by_session(&digest_str(session_token))?
            .ok_or(PairingError::NotFound("Session"))?;

        if let (Some(ttl), Some(issued_at)) = (self.session_ttl, user.session_issued_at) {
            let age = chrono::Utc::now().timestamp().saturating_sub(issued_at);
            if age >= i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX) {
                tracing::debug!(username = %user.username, "Session expired");
                return Err(PairingError::NotFound("Session"));
            }
        }

        Ok(PublicUser::from(&user))
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SqliteUserStore;
    use crate::pairing::ConnectionId;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn fp0() -> Fingerprint {
        Fingerprint {
            vendor: Some("Apple Computer, Inc.".into()),
            platform: Some("iPhone".into()),
            timezone: Some("Europe/Paris".into()),
            resolution: Some("1170x2532".into()),
            fonts: Some(vec!["Arial".into(), "Helvetica".into()]),
            touch_support: Some(true),
            canvas: Some("c4nv45".into()),
            ..Fingerprint::default()
        }
    }

    fn service() -> PairingService {
        let store = Arc::new(SqliteUserStore::in_memory().unwrap());
        PairingService::new(store, Arc::new(ConnectionRegistry::with_defaults()))
            .with_secret(ServerSecret::fixed("test-secret"))
    }

    fn open_channel(
        service: &PairingService,
        token: &PairingToken,
    ) -> (ConnectionId, UnboundedReceiver<ServerMessage>) {
        let (tx, mut rx) = unbounded_channel();
        let id = service.registry().connect(tx);
        service
            .registry()
            .on_message(id, &format!("hash:{token}"));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::Connected);
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::BindAck);
        (id, rx)
    }

    fn register_alice(service: &PairingService) -> Registration {
        service
            .register("alice", "Passw0rd", "alice@x.com", Some(fp0()))
            .unwrap()
    }

    fn login_alice(service: &PairingService) -> PairingToken {
        service.authenticate("alice", "Passw0rd").unwrap()
    }

    #[test]
    fn availability_reflects_registrations() {
        let service = service();
        assert!(service.check_availability("alice", Some("alice@x.com")).unwrap());

        register_alice(&service);
        assert!(!service.check_availability("alice", None).unwrap());
        assert!(!service.check_availability("bobby", Some("alice@x.com")).unwrap());
        assert!(service.check_availability("bobby", Some("bob@x.com")).unwrap());
    }

    #[test]
    fn registration_notifies_the_bound_channel() {
        let service = service();
        let token = registration_token("alice", "alice@x.com");
        let (id, mut rx) = open_channel(&service, &token);

        let registration = register_alice(&service);
        assert_eq!(registration.delivery, Delivery::Delivered(id));
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::Registered);
    }

    #[test]
    fn registration_without_channel_still_creates_user() {
        let service = service();
        let registration = register_alice(&service);
        assert_eq!(registration.delivery, Delivery::Undelivered);
        assert_eq!(service.store().user_count().unwrap(), 1);
    }

    #[test]
    fn duplicate_registration_is_a_conflict() {
        let service = service();
        register_alice(&service);

        let err = service
            .register("alice", "Passw0rd", "other@x.com", None)
            .unwrap_err();
        assert!(matches!(err, PairingError::Conflict("Username")));

        let err = service
            .register("bobby", "Passw0rd", "alice@x.com", None)
            .unwrap_err();
        assert!(matches!(err, PairingError::Conflict("Email")));
    }

    #[test]
    fn invalid_registration_is_rejected_before_storage() {
        let service = service();
        let err = service
            .register("al", "Passw0rd", "alice@x.com", None)
            .unwrap_err();
        assert!(matches!(err, PairingError::Validation(_)));
        assert_eq!(service.store().user_count().unwrap(), 0);
    }

    #[test]
    fn authenticate_distinguishes_unknown_user_and_bad_password() {
        let service = service();
        register_alice(&service);

        assert!(matches!(
            service.authenticate("bobby", "Passw0rd"),
            Err(PairingError::NotFound("User"))
        ));
        assert!(matches!(
            service.authenticate("alice", "WrongPass1"),
            Err(PairingError::Credential)
        ));
    }

    #[test]
    fn authenticate_returns_the_login_token() {
        let service = service();
        let registration = register_alice(&service);

        let token = service.authenticate("alice", "Passw0rd").unwrap();
        let expected = login_token(
            &ServerSecret::fixed("test-secret"),
            "alice",
            &registration.user_id,
        );
        assert_eq!(token, expected);
    }

    #[test]
    fn matching_device_delivers_session_to_login_channel() {
        let service = service();
        register_alice(&service);
        let login = service.authenticate("alice", "Passw0rd").unwrap();
        let (id, mut rx) = open_channel(&service, &login);

        let issued = service.reverify("alice", &fp0()).unwrap();
        assert_eq!(issued.delivery, Delivery::Delivered(id));
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::LoggedIn(issued.session_token.clone())
        );

        let user = service.session_user(&issued.session_token).unwrap();
        assert_eq!(user.username, "alice");
    }

    #[test]
    fn canvas_only_difference_still_matches() {
        let service = service();
        register_alice(&service);

        login_alice(&service);

        let mut submitted = fp0();
        submitted.canvas = Some("different".into());
        assert!(service.reverify("alice", &submitted).is_ok());
    }

    #[test]
    fn platform_mismatch_issues_nothing() {
        let service = service();
        register_alice(&service);
        let login = service.authenticate("alice", "Passw0rd").unwrap();
        let (_, mut rx) = open_channel(&service, &login);

        let mut submitted = fp0();
        submitted.platform = Some("Android".into());
        let err = service.reverify("alice", &submitted).unwrap_err();
        assert!(matches!(err, PairingError::DeviceMismatch));

        assert!(rx.try_recv().is_err());
        let stored = service.store().find_by_username("alice").unwrap().unwrap();
        assert!(stored.session_token_hash.is_none());
    }

    #[test]
    fn missing_enrollment_is_reported_separately() {
        let service = service();
        let registration = register_alice(&service);
        service
            .store()
            .clear_fingerprint(&registration.user_id)
            .unwrap();
        login_alice(&service);

        let err = service.reverify("alice", &fp0()).unwrap_err();
        assert!(matches!(err, PairingError::EnrollmentMissing));
    }

    #[test]
    fn reverify_unknown_user_is_not_found() {
        let service = service();
        assert!(matches!(
            service.reverify("ghost", &fp0()),
            Err(PairingError::NotFound("User"))
        ));
    }

    #[test]
    fn undelivered_session_is_still_persisted() {
        let service = service();
        register_alice(&service);
        login_alice(&service);

        let issued = service.reverify("alice", &fp0()).unwrap();
        assert_eq!(issued.delivery, Delivery::Undelivered);

        let user = service.session_user(&issued.session_token).unwrap();
        assert_eq!(user.username, "alice");
        assert!(user.session_issued_at.is_some());
    }

    #[test]
    fn channel_closed_before_delivery_is_a_miss_not_an_error() {
        let service = service();
        register_alice(&service);
        let login = service.authenticate("alice", "Passw0rd").unwrap();
        let (id, _rx) = open_channel(&service, &login);
        service.registry().disconnect(id);

        let issued = service.reverify("alice", &fp0()).unwrap();
        assert_eq!(issued.delivery, Delivery::Undelivered);
        assert!(service.session_user(&issued.session_token).is_ok());
    }

    #[test]
    fn new_session_replaces_the_previous_one() {
        let service = service();
        register_alice(&service);

        login_alice(&service);
        let first = service.reverify("alice", &fp0()).unwrap();
        login_alice(&service);
        let second = service.reverify("alice", &fp0()).unwrap();
        assert_ne!(first.session_token, second.session_token);

        assert!(matches!(
            service.session_user(&first.session_token),
            Err(PairingError::NotFound("Session"))
        ));
        assert!(service.session_user(&second.session_token).is_ok());
    }

    #[test]
    fn unknown_or_blank_session_is_not_found() {
        let service = service();
        assert!(matches!(
            service.session_user("nope"),
            Err(PairingError::NotFound("Session"))
        ));
        assert!(matches!(
            service.session_user("  "),
            Err(PairingError::NotFound("Session"))
        ));
    }

    #[test]
    fn expired_session_is_rejected() {
        let store = Arc::new(SqliteUserStore::in_memory().unwrap());
        let service = PairingService::new(store, Arc::new(ConnectionRegistry::with_defaults()))
            .with_session_ttl(Duration::from_secs(60));
        let registration = register_alice(&service);
        login_alice(&service);
        let issued = service.reverify("alice", &fp0()).unwrap();
        assert!(service.session_user(&issued.session_token).is_ok());

        // Back-date the session past its lifetime.
        let stale = chrono::Utc::now().timestamp() - 120;
        service
            .store()
            .set_session(&registration.user_id, &digest_str(&issued.session_token), stale)
            .unwrap();
        assert!(matches!(
            service.session_user(&issued.session_token),
            Err(PairingError::NotFound("Session"))
        ));
    }

    #[test]
    fn login_token_of_another_process_does_not_receive_the_session() {
        let service = service();
        register_alice(&service);

        let foreign = PairingService::new(
            Arc::new(SqliteUserStore::in_memory().unwrap()),
            Arc::new(ConnectionRegistry::with_defaults()),
        );
        foreign
            .register("alice", "Passw0rd", "alice@x.com", Some(fp0()))
            .unwrap();
        let foreign_token = foreign.authenticate("alice", "Passw0rd").unwrap();
        let (_, mut rx) = open_channel(&service, &foreign_token);
        login_alice(&service);

        let issued = service.reverify("alice", &fp0()).unwrap();
        assert_eq!(issued.delivery, Delivery::Undelivered);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reverify_without_prior_login_is_rejected() {
        let service = service();
        register_alice(&service);

        let err = service.reverify("alice", &fp0()).unwrap_err();
        assert!(matches!(err, PairingError::NotFound("Login")));
        let stored = service.store().find_by_username("alice").unwrap().unwrap();
        assert!(stored.session_token_hash.is_none());
    }

    #[test]
    fn pending_login_is_consumed_by_one_reverify() {
        let service = service();
        register_alice(&service);
        login_alice(&service);

        let legit = service.reverify("alice", &fp0()).unwrap();
        let replay = service.reverify("alice", &fp0()).unwrap_err();
        assert!(matches!(replay, PairingError::NotFound("Login")));

        // The legitimate session was not replaced.
        assert!(service.session_user(&legit.session_token).is_ok());
    }

    #[test]
    fn rejected_fingerprint_also_consumes_the_login() {
        let service = service();
        register_alice(&service);
        login_alice(&service);

        let mut submitted = fp0();
        submitted.vendor = Some("Google Inc.".into());
        assert!(matches!(
            service.reverify("alice", &submitted),
            Err(PairingError::DeviceMismatch)
        ));
        assert!(matches!(
            service.reverify("alice", &fp0()),
            Err(PairingError::NotFound("Login"))
        ));
    }

    #[test]
    fn expired_pending_login_is_rejected() {
        let store = Arc::new(SqliteUserStore::in_memory().unwrap());
        let service = PairingService::new(store, Arc::new(ConnectionRegistry::with_defaults()))
            .with_login_ttl(Duration::ZERO);
        register_alice(&service);
        login_alice(&service);

        assert!(matches!(
            service.reverify("alice", &fp0()),
            Err(PairingError::NotFound("Login"))
        ));
    }

    #[test]
    fn sweep_drops_only_expired_logins() {
        let store = Arc::new(SqliteUserStore::in_memory().unwrap());
        let expired = PairingService::new(store, Arc::new(ConnectionRegistry::with_defaults()))
            .with_login_ttl(Duration::ZERO);
        register_alice(&expired);
        login_alice(&expired);
        assert_eq!(expired.sweep_expired_logins(), 1);
        assert_eq!(expired.sweep_expired_logins(), 0);

        let live = service();
        register_alice(&live);
        login_alice(&live);
        assert_eq!(live.sweep_expired_logins(), 0);
        assert!(live.reverify("alice", &fp0()).is_ok());
    }
}
