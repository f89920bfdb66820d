//! User accounts: storage, credential hashing and request validation.
//!
//! ## Design Decisions
//! - The store is an equality-query document store behind [`UserStore`];
//!   the shipped implementation is SQLite.
//! - Password hashing uses iterated SHA-256 (100k rounds) + per-user salt.
//! - Session tokens are persisted only as their SHA-256 digest.

pub mod password;
pub mod store;
pub mod validate;

pub use store::{PublicUser, SqliteUserStore, User, UserStore};
