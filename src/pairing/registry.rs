//! Registry of live desktop channels and the pairing token each announced.
//!
//! The registry is owned by the server state and shared behind an `Arc`;
//! every operation takes the lock once, so connect, message, disconnect and
//! delivery are atomic steps relative to each other.
//!
//! ## Rules
//! - Membership mirrors liveness: a connection is added on open and removed
//!   on close, bound or not.
//! - A connection holds at most one binding. Announcing a different token
//!   replaces it (last write wins); re-announcing the same token only
//!   refreshes its expiry.
//! - Bindings expire `binding_ttl` after they were made. Expired bindings
//!   are invisible to lookups and are cleared by [`ConnectionRegistry::sweep_expired`].
//! - Delivery goes to the earliest-bound live connection for a token
//!   (first-bound wins); the others are left untouched.

use super::message::{parse_announcement, ServerMessage};
use super::token::PairingToken;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

/// Default lifetime of a pending binding: 10 minutes.
pub const DEFAULT_BINDING_TTL_SECS: u64 = 600;

pub type ConnectionId = u64;

/// Outbound queue of a channel; the socket task drains it.
pub type Outbox = UnboundedSender<ServerMessage>;

/// What happened to an inbound channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The frame announced a token and it is now bound.
    Bound(PairingToken),
    /// Not an announcement; dropped without error.
    Ignored,
    /// The connection is no longer registered; the frame was not processed.
    UnknownConnection,
}

/// Result of pushing a notification for a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered(ConnectionId),
    /// No live channel bound to the token. A normal outcome, not an error.
    Undelivered,
}

impl Delivery {
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

struct Binding {
    token: PairingToken,
    /// Global bind order, used for the first-bound tie-break.
    seq: u64,
    expires_at: Instant,
}

impl Binding {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

struct Connection {
    outbox: Outbox,
    binding: Option<Binding>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: ConnectionId,
    next_seq: u64,
    connections: HashMap<ConnectionId, Connection>,
}

impl RegistryInner {
    /// Live connections bound to `token`, earliest binding first.
    fn bound_to(&self, token: &PairingToken, now: Instant) -> Vec<(u64, ConnectionId)> {
        let mut hits: Vec<(u64, ConnectionId)> = self
            .connections
            .iter()
            .filter_map(|(id, conn)| {
                conn.binding
                    .as_ref()
                    .filter(|b| b.is_live(now) && b.token == *token)
                    .map(|b| (b.seq, *id))
            })
            .collect();
        hits.sort_unstable();
        hits
    }
}

pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    binding_ttl: Duration,
}

impl ConnectionRegistry {
    pub fn new(binding_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            binding_ttl,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(Duration::from_secs(DEFAULT_BINDING_TTL_SECS))
    }

    /// Register a freshly opened channel and send it the liveness ack.
    pub fn connect(&self, outbox: Outbox) -> ConnectionId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;

        // A closed receiver here means the socket is already gone; the
        // socket task will still call `disconnect`.
        let _ = outbox.send(ServerMessage::Connected);
        inner.connections.insert(
            id,
            Connection {
                outbox,
                binding: None,
            },
        );
        tracing::debug!(connection = id, "Pairing channel connected");
        id
    }

    /// Handle one inbound frame from `id`.
    pub fn on_message(&self, id: ConnectionId, payload: &str) -> MessageOutcome {
        let mut inner = self.inner.lock();
        if !inner.connections.contains_key(&id) {
            return MessageOutcome::UnknownConnection;
        }
        let Some(token) = parse_announcement(payload) else {
            return MessageOutcome::Ignored;
        };

        let expires_at = Instant::now() + self.binding_ttl;
        inner.next_seq += 1;
        let next_seq = inner.next_seq;

        let Some(conn) = inner.connections.get_mut(&id) else {
            return MessageOutcome::UnknownConnection;
        };
        match conn.binding.as_mut() {
            Some(existing) if existing.token == token => {
                existing.expires_at = expires_at;
            }
            _ => {
                conn.binding = Some(Binding {
                    token: token.clone(),
                    seq: next_seq,
                    expires_at,
                });
            }
        }

        if conn.outbox.send(ServerMessage::BindAck).is_err() {
            inner.connections.remove(&id);
            tracing::debug!(connection = id, "Pairing channel closed before bind ack");
            return MessageOutcome::UnknownConnection;
        }

        tracing::info!(connection = id, token = token.short(), "Pairing token bound");
        MessageOutcome::Bound(token)
    }

    /// Remove a channel, whatever its binding state. Returns whether it was present.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let removed = self.inner.lock().connections.remove(&id);
        if let Some(conn) = &removed {
            tracing::debug!(
                connection = id,
                was_bound = conn.binding.is_some(),
                "Pairing channel disconnected"
            );
        }
        removed.is_some()
    }

    /// Every live connection currently bound to `token`, earliest binding first.
    pub fn find_by_token(&self, token: &PairingToken) -> Vec<ConnectionId> {
        let inner = self.inner.lock();
        inner
            .bound_to(token, Instant::now())
            .into_iter()
            .map(|(_, id)| id)
            .collect()
    }

    /// Push `message` to the first connection bound to `token`.
    ///
    /// A connection whose socket task has already gone is pruned and the
    /// next binding in order is tried.
    pub fn deliver(&self, token: &PairingToken, message: ServerMessage) -> Delivery {
        let mut inner = self.inner.lock();
        let candidates = inner.bound_to(token, Instant::now());
        if candidates.len() > 1 {
            tracing::debug!(
                token = token.short(),
                bound = candidates.len(),
                "Several channels bound to one token; delivering to the earliest"
            );
        }

        for (_, id) in candidates {
            let sent = inner
                .connections
                .get(&id)
                .is_some_and(|conn| conn.outbox.send(message.clone()).is_ok());
            if sent {
                tracing::info!(
                    connection = id,
                    token = token.short(),
                    kind = message.kind(),
                    "Pairing notification delivered"
                );
                return Delivery::Delivered(id);
            }
            inner.connections.remove(&id);
        }

        tracing::info!(
            token = token.short(),
            kind = message.kind(),
            "No channel bound for pairing notification"
        );
        Delivery::Undelivered
    }

    /// Clear bindings past their lifetime. Connections stay registered.
    /// Returns the number of bindings cleared.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let mut cleared = 0;
        for conn in inner.connections.values_mut() {
            if conn.binding.as_ref().is_some_and(|b| !b.is_live(now)) {
                conn.binding = None;
                cleared += 1;
            }
        }
        cleared
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connections.len()
    }

    /// Connections holding a live binding.
    pub fn bound_count(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .connections
            .values()
            .filter(|c| c.binding.as_ref().is_some_and(|b| b.is_live(now)))
            .count()
    }
}

// ── Tests ───────────────────────────────────────────────────────
