//! In-memory session registry.
//!
//! The registry exclusively owns every live session. Everyone else refers to
//! sessions by [`SessionId`] and resolves them here at the moment of use, so
//! a closed connection is never reached through a stale handle.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RoutingError, TransportError};

/// Serialized envelope frame, shared by every destination of one publish.
pub type Frame = Arc<str>;

/// Stable identifier of one connection. Minted at registration, never reissued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Write side of one connection's outbound queue.
///
/// The queue is the per-connection serialization point: frames reach the
/// socket in the order they were accepted here.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub session_id: SessionId,
    frame_tx: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    /// Queue a frame without waiting. A full queue is reported, not awaited,
    /// so one slow session never holds up the others.
    pub fn try_send(&self, frame: Frame) -> Result<(), TransportError> {
        self.frame_tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure {
                session_id: self.session_id,
            },
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed {
                session_id: self.session_id,
            },
        })
    }
}

/// Returned by [`SessionRegistry::register`]: the new id plus the read side
/// of its outbound queue, owned by the connection's socket task.
#[derive(Debug)]
pub struct Registration {
    pub session_id: SessionId,
    pub outbound_rx: mpsc::Receiver<Frame>,
}

/// Public view of a registered session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub connected_at: String,
    pub last_seen_at: String,
}

struct SessionEntry {
    handle: ConnectionHandle,
    /// Registration order; defines registry iteration order.
    seq: u64,
    connected_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    last_seen: Instant,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<SessionId, SessionEntry>,
    next_seq: u64,
}

impl RegistryState {
    /// Entries in registration order.
    fn ordered(&self) -> Vec<&SessionEntry> {
        let mut entries: Vec<&SessionEntry> = self.sessions.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }
}

/// Thread-safe registry of live sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    state: Arc<RwLock<RegistryState>>,
    outbound_capacity: usize,
}

impl SessionRegistry {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// Register a new connection. The only place a [`SessionId`] is created.
    pub async fn register(&self) -> Registration {
        let (frame_tx, outbound_rx) = mpsc::channel(self.outbound_capacity);
        let mut state = self.state.write().await;

        let mut session_id = SessionId::generate();
        while state.sessions.contains_key(&session_id) {
            session_id = SessionId::generate();
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let now = Utc::now();
        state.sessions.insert(
            session_id,
            SessionEntry {
                handle: ConnectionHandle {
                    session_id,
                    frame_tx,
                },
                seq,
                connected_at: now,
                last_seen_at: now,
                last_seen: Instant::now(),
            },
        );
        let total = state.sessions.len();
        drop(state);

        info!(session_id = %session_id, total, "Session registered");
        Registration {
            session_id,
            outbound_rx,
        }
    }

    /// Remove a session. Dropping its queue sender lets the socket task
    /// notice and close the connection.
    pub async fn unregister(&self, session_id: SessionId) -> bool {
        let removed = self.state.write().await.sessions.remove(&session_id);
        if removed.is_some() {
            info!(session_id = %session_id, "Session unregistered");
            true
        } else {
            debug!(session_id = %session_id, "Session already unregistered");
            false
        }
    }

    /// Record inbound activity. Returns `false` for unknown sessions.
    pub async fn touch(&self, session_id: SessionId) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.sessions.get_mut(&session_id) else {
            return false;
        };
        entry.last_seen = Instant::now();
        entry.last_seen_at = Utc::now();
        true
    }

    /// Every registered session except `excluding`, in registration order.
    pub async fn list_others(&self, excluding: SessionId) -> Vec<SessionId> {
        self.state
            .read()
            .await
            .ordered()
            .into_iter()
            .map(|e| e.handle.session_id)
            .filter(|id| *id != excluding)
            .collect()
    }

    /// Resolve a session to its connection handle.
    pub async fn lookup(&self, session_id: SessionId) -> Result<ConnectionHandle, RoutingError> {
        self.state
            .read()
            .await
            .sessions
            .get(&session_id)
            .map(|e| e.handle.clone())
            .ok_or_else(|| RoutingError::TargetNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Snapshot of handles in registration order, optionally skipping one
    /// session. Publishing iterates the snapshot, so registry mutation
    /// during delivery cannot disturb the loop.
    pub async fn snapshot(&self, excluding: Option<SessionId>) -> Vec<ConnectionHandle> {
        self.state
            .read()
            .await
            .ordered()
            .into_iter()
            .filter(|e| Some(e.handle.session_id) != excluding)
            .map(|e| e.handle.clone())
            .collect()
    }

    /// Public info for every session, in registration order.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.state
            .read()
            .await
            .ordered()
            .into_iter()
            .map(|e| SessionInfo {
                session_id: e.handle.session_id,
                connected_at: e.connected_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                last_seen_at: e.last_seen_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            })
            .collect()
    }

    pub async fn is_connected(&self, session_id: SessionId) -> bool {
        self.state.read().await.sessions.contains_key(&session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    /// Remove sessions with no inbound frame within `window`.
    pub async fn reap_stale(&self, window: Duration) -> Vec<SessionId> {
        self.reap_stale_at(Instant::now(), window).await
    }

    /// [`Self::reap_stale`] against an explicit clock reading.
    pub async fn reap_stale_at(&self, now: Instant, window: Duration) -> Vec<SessionId> {
        let mut state = self.state.write().await;
        let stale: Vec<SessionId> = state
            .sessions
            .values()
            .filter(|e| now.saturating_duration_since(e.last_seen) > window)
            .map(|e| e.handle.session_id)
            .collect();

        for session_id in &stale {
            state.sessions.remove(session_id);
            warn!(session_id = %session_id, "Removed stale session");
        }
        stale
    }
}
