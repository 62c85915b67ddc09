use dashmap::DashMap;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

/// Handle held in the session registry — used to deliver frames to a
/// connection's task.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    /// Channel sender for the connection's delivery queue. Entries are
    /// fully encoded frames (prefix included).
    pub tx: mpsc::Sender<Vec<u8>>,
    /// Authenticated account name of the connection.
    pub username: String,
    /// Instant when the session was admitted (guards stale removals).
    pub connected_at: Instant,
}

/// The requested name is already bound to a live session.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("name taken")]
pub struct NameTaken;

/// Concurrent account-name → session routing table.
///
/// The single source of truth for who is online and on which connection.
/// Connection tasks register themselves after a successful handshake and
/// remove themselves (guarded by `connected_at`) on the way out.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: DashMap<String, SessionHandle>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Insert a session under its account name.
    ///
    /// # Errors
    ///
    /// Returns [`NameTaken`] if the name is already bound to a live
    /// session; the existing entry is left untouched.
    pub fn register(&self, handle: SessionHandle) -> Result<(), NameTaken> {
        match self.sessions.entry(handle.username.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(NameTaken),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(handle);
                Ok(())
            }
        }
    }

    /// Remove an entry only if it was admitted at the given instant, so a
    /// stale cleanup cannot evict a newer session under the same name.
    pub fn unregister_if(&self, username: &str, connected_at: Instant) {
        self.sessions
            .remove_if(username, |_k, v| v.connected_at == connected_at);
    }

    /// Look up a live session by account name.
    #[must_use]
    pub fn lookup(&self, username: &str) -> Option<SessionHandle> {
        self.sessions.get(username).map(|entry| entry.value().clone())
    }

    /// Snapshot of all live sessions. This is the thread-safe read path
    /// for presentation layers; it never hands out references into the map.
    #[must_use]
    pub fn all(&self) -> Vec<(String, SessionHandle)> {
        self.sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
