//! SQLite-backed user store.
//!
//! Table `users`: id, username, email, password_hash, salt, fingerprint
//! (JSON), session_token_hash, session_issued_at, created_at. Usernames and
//! emails are unique case-insensitively; `session_token_hash` is indexed for
//! the "who is this session" lookup.
//!
//! Session tokens are stored as a SHA-256 digest, never in plaintext.

use crate::error::{PairingError, Result};
use crate::security::fingerprint::Fingerprint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A registered user, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    pub session_token_hash: Option<String>,
    pub session_issued_at: Option<i64>,
    pub created_at: i64,
}

/// What the "fetch session user" call returns: no fingerprint, no credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: i64,
    pub session_issued_at: Option<i64>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            created_at: user.created_at,
            session_issued_at: user.session_issued_at,
        }
    }
}

/// Equality-query document store for users.
pub trait UserStore: Send + Sync {
    fn username_taken(&self, username: &str) -> Result<bool>;

    fn email_taken(&self, email: &str) -> Result<bool>;

    /// Insert a new user. A duplicate username or email is a `Conflict`.
    fn insert(&self, user: &User) -> Result<()>;

    fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    fn find_by_session(&self, session_token_hash: &str) -> Result<Option<User>>;

    /// Overwrite the user's session (single active session per user).
    fn set_session(&self, user_id: &str, session_token_hash: &str, issued_at: i64) -> Result<()>;

    /// Administrative device reset. Returns whether a fingerprint was removed.
    fn clear_fingerprint(&self, user_id: &str) -> Result<bool>;

    fn user_count(&self) -> Result<u64>;
}

const USER_COLUMNS: &str = "id, username, email, password_hash, salt, fingerprint, \
                            session_token_hash, session_issued_at, created_at";

pub struct SqliteUserStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteUserStore {
    /// Open (or create) the user database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(anyhow::Error::from)?;
            }
        }
        let conn = rusqlite::Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init(conn)
    }

    /// In-memory store for tests and throwaway runs.
    pub fn in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                email TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                salt TEXT NOT NULL,
                fingerprint TEXT,
                session_token_hash TEXT,
                session_issued_at INTEGER,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_session ON users(session_token_hash);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn find_one(&self, clause: &str, value: &str) -> Result<Option<User>> {
        let conn = self.conn.lock();
        let row = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}"),
            rusqlite::params![value],
            row_to_parts,
        );
        match row {
            Ok(parts) => Ok(Some(parts.into_user()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, clause: &str, value: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM users WHERE {clause}"),
            rusqlite::params![value],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

/// Raw row; the fingerprint JSON is decoded outside the rusqlite closure.
struct UserRow {
    id: String,
    username: String,
    email: String,
    password_hash: String,
    salt: String,
    fingerprint: Option<String>,
    session_token_hash: Option<String>,
    session_issued_at: Option<i64>,
    created_at: i64,
}

fn row_to_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        salt: row.get(4)?,
        fingerprint: row.get(5)?,
        session_token_hash: row.get(6)?,
        session_issued_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl UserRow {
    fn into_user(self) -> Result<User> {
        let fingerprint = self
            .fingerprint
            .as_deref()
            .map(|raw| serde_json::from_str::<Fingerprint>(raw))
            .transpose()?;
        Ok(User {
            id: self.id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            salt: self.salt,
            fingerprint,
            session_token_hash: self.session_token_hash,
            session_issued_at: self.session_issued_at,
            created_at: self.created_at,
        })
    }
}

impl UserStore for SqliteUserStore {
    fn username_taken(&self, username: &str) -> Result<bool> {
        self.exists("username = ?1", username)
    }

    fn email_taken(&self, email: &str) -> Result<bool> {
        self.exists("email = ?1", email)
    }

    fn insert(&self, user: &User) -> Result<()> {
        let fingerprint = user
            .fingerprint
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn.lock();
        let result = conn.execute(
            &format!("INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            rusqlite::params![
                user.id,
                user.username,
                user.email,
                user.password_hash,
                user.salt,
                fingerprint,
                user.session_token_hash,
                user.session_issued_at,
                user.created_at,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let field = if msg.as_deref().is_some_and(|m| m.contains("users.email")) {
                    "Email"
                } else {
                    "Username"
                };
                Err(PairingError::Conflict(field))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find_one("username = ?1", username)
    }

    fn find_by_session(&self, session_token_hash: &str) -> Result<Option<User>> {
        self.find_one("session_token_hash = ?1", session_token_hash)
    }

    fn set_session(&self, user_id: &str, session_token_hash: &str, issued_at: i64) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET session_token_hash = ?1, session_issued_at = ?2 WHERE id = ?3",
            rusqlite::params![session_token_hash, issued_at, user_id],
        )?;
        if updated == 0 {
            return Err(PairingError::NotFound("User"));
        }
        Ok(())
    }

    fn clear_fingerprint(&self, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE users SET fingerprint = NULL WHERE id = ?1 AND fingerprint IS NOT NULL",
            rusqlite::params![user_id],
        )?;
        if updated > 0 {
            tracing::info!(user_id, "Enrolled fingerprint cleared");
        }
        Ok(updated > 0)
    }

    fn user_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn user(id: &str, username: &str, email: &str) -> User {
        User {
            id: id.into(),
            username: username.into(),
            email: email.into(),
            password_hash: "hash".into(),
            salt: "salt".into(),
            fingerprint: Some(Fingerprint {
                platform: Some("iPhone".into()),
                ..Fingerprint::default()
            }),
            session_token_hash: None,
            session_issued_at: None,
            created_at: 1_700_000_000,
        }
    }

    fn test_store() -> SqliteUserStore {
        SqliteUserStore::in_memory().unwrap()
    }

    #[test]
    fn insert_and_find_by_username() {
        let store = test_store();
        let alice = user("u-1", "alice", "alice@x.com");
        store.insert(&alice).unwrap();

        let found = store.find_by_username("alice").unwrap().unwrap();
        assert_eq!(found, alice);
        assert!(store.find_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn username_and_email_are_case_insensitive_unique() {
        let store = test_store();
        store.insert(&user("u-1", "alice", "alice@x.com")).unwrap();

        assert!(store.username_taken("ALICE").unwrap());
        assert!(store.email_taken("Alice@X.com").unwrap());

        let dup_name = store.insert(&user("u-2", "Alice", "other@x.com"));
        assert!(matches!(dup_name, Err(PairingError::Conflict("Username"))));

        let dup_mail = store.insert(&user("u-3", "bobby", "ALICE@x.com"));
        assert!(matches!(dup_mail, Err(PairingError::Conflict("Email"))));
    }

    #[test]
    fn session_lookup_uses_secondary_index() {
        let store = test_store();
        store.insert(&user("u-1", "alice", "alice@x.com")).unwrap();

        assert!(store.find_by_session("h1").unwrap().is_none());
        store.set_session("u-1", "h1", 42).unwrap();

        let found = store.find_by_session("h1").unwrap().unwrap();
        assert_eq!(found.id, "u-1");
        assert_eq!(found.session_issued_at, Some(42));

        // A new session replaces the old one.
        store.set_session("u-1", "h2", 43).unwrap();
        assert!(store.find_by_session("h1").unwrap().is_none());
        assert!(store.find_by_session("h2").unwrap().is_some());
    }

    #[test]
    fn set_session_for_unknown_user_fails() {
        let store = test_store();
        let err = store.set_session("ghost", "h", 1).unwrap_err();
        assert!(matches!(err, PairingError::NotFound("User")));
    }

    #[test]
    fn clear_fingerprint_resets_enrollment() {
        let store = test_store();
        store.insert(&user("u-1", "alice", "alice@x.com")).unwrap();

        assert!(store.clear_fingerprint("u-1").unwrap());
        assert!(!store.clear_fingerprint("u-1").unwrap());
        let found = store.find_by_username("alice").unwrap().unwrap();
        assert!(found.fingerprint.is_none());
    }

    #[test]
    fn user_without_fingerprint_round_trips() {
        let store = test_store();
        let mut bare = user("u-1", "alice", "alice@x.com");
        bare.fingerprint = None;
        store.insert(&bare).unwrap();
        assert_eq!(store.find_by_username("alice").unwrap().unwrap(), bare);
    }

    #[test]
    fn user_count_tracks_registrations() {
        let store = test_store();
        assert_eq!(store.user_count().unwrap(), 0);
        store.insert(&user("u-1", "alice", "alice@x.com")).unwrap();
        store.insert(&user("u-2", "bobby", "bob@x.com")).unwrap();
        assert_eq!(store.user_count().unwrap(), 2);
    }

    #[test]
    fn file_backed_store_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("users.db");
        {
            let store = SqliteUserStore::open(&path).unwrap();
            store.insert(&user("u-1", "alice", "alice@x.com")).unwrap();
        }
        let reopened = SqliteUserStore::open(&path).unwrap();
        assert!(reopened.username_taken("alice").unwrap());
    }

    #[test]
    fn public_view_drops_fingerprint_and_credentials() {
        let alice = user("u-1", "alice", "alice@x.com");
        let json = serde_json::to_value(PublicUser::from(&alice)).unwrap();
        assert!(json.get("fingerprint").is_none());
        assert!(json.get("password_hash").is_none());
        assert!(json.get("salt").is_none());
        assert_eq!(json["username"], "alice");
    }
}
