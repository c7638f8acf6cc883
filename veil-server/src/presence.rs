//! Presence registry for connected identities
//!
//! Tracks who is online and owns each session's outbound event channel.
//! Identities are created on admission with a random display name and
//! destroyed on disconnect; there is no capacity limit here beyond the one
//! the connection tracker enforces upstream.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{RwLock, mpsc};

use veil_common::names::generate_username;
use veil_common::protocol::{ServerMessage, User};

/// A connected session: identity plus its outbound event channel
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    /// Channel sender for delivering events to this session's connection task
    pub tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Session {
    /// Session ID (unique identifier for this connection)
    pub fn session_id(&self) -> u32 {
        self.user.id
    }
}

/// Manages all connected sessions
#[derive(Debug, Clone)]
pub struct PresenceRegistry {
    sessions: Arc<RwLock<HashMap<u32, Session>>>,
    next_id: Arc<AtomicU32>,
    debug: bool,
}

impl PresenceRegistry {
    /// Create a new empty registry
    pub fn new(debug: bool) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU32::new(1)),
            debug,
        }
    }

    /// Register a new session and assign it an identity
    ///
    /// Session IDs are allocated from a monotone counter, which is what
    /// gives `snapshot()` its insertion order.
    pub async fn register(&self, tx: mpsc::UnboundedSender<ServerMessage>) -> Session {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Session {
            user: User {
                id,
                username: generate_username(),
            },
            tx,
        };
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, session.clone());
        session
    }

    /// Remove a session, returning its identity if it was registered
    pub async fn unregister(&self, session_id: u32) -> Option<User> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&session_id).map(|s| s.user)
    }

    /// Get a session's identity
    pub async fn get(&self, session_id: u32) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions.get(&session_id).cloned()
    }

    /// Get all connected identities in insertion order
    pub async fn snapshot(&self) -> Vec<User> {
        let sessions = self.sessions.read().await;
        let mut users: Vec<User> = sessions.values().map(|s| s.user.clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    /// Number of connected sessions
    pub async fn len(&self) -> usize {
        let sessions = self.sessions.read().await;
        sessions.len()
    }

    /// Whether no sessions are connected
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Deliver an event to every connected session
    ///
    /// Best-effort: a failed send (connection task already gone) is skipped,
    /// never propagated - one dead connection must not block delivery to the
    /// rest. This fires on the routine disconnect race, so it only logs
    /// under the debug gate.
    pub async fn broadcast(&self, msg: ServerMessage) {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            if session.tx.send(msg.clone()).is_err() && self.debug {
                eprintln!(
                    "Dropped event for session {}: connection closed",
                    session.user.id
                );
            }
        }
    }

    /// Deliver an event to every connected session except one
    pub async fn broadcast_except(&self, excluded_session_id: u32, msg: ServerMessage) {
        let sessions = self.sessions.read().await;
        for session in sessions.values() {
            if session.user.id == excluded_session_id {
                continue;
            }
            if session.tx.send(msg.clone()).is_err() && self.debug {
                eprintln!(
                    "Dropped event for session {}: connection closed",
                    session.user.id
                );
            }
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new(false)
    }
}
