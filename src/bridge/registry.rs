//! Session registry for connected clients.
//!
//! Tracks every live WebSocket session by [`SessionId`], in registration
//! order, with its outbound handle and activity timestamp.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           SessionRegistry               │
//! │  ┌─────────────────────────────────┐    │
//! │  │ client_1 → SessionEntry         │    │
//! │  │ client_2 → SessionEntry         │    │
//! │  │ client_3 → SessionEntry         │    │
//! │  └─────────────────────────────────┘    │
//! │  order: [client_1, client_2, client_3]  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! All mutations and snapshots go through one lock, so a dispatch snapshot
//! never observes a half-applied register or remove.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;

// ============================================================================
// PeerMetadata
// ============================================================================

/// Diagnostic details about the remote end of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerMetadata {
    /// Remote socket address.
    pub addr: Option<SocketAddr>,
    /// `User-Agent` header from the upgrade request.
    pub user_agent: Option<String>,
}

impl PeerMetadata {
    /// Creates metadata for a peer address.
    #[inline]
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr: Some(addr),
            user_agent: None,
        }
    }

    /// Sets the user agent.
    #[inline]
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }
}

// ============================================================================
// SessionHandle
// ============================================================================

/// Write side of a session's transport.
///
/// Delivery never waits: a frame is either queued into the session's bounded
/// buffer immediately or the session is reported unwritable.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Bounded queue drained by the session's event loop.
    outbound: mpsc::Sender<Message>,
    /// Signals the event loop to close the socket.
    closer: Arc<Notify>,
}

/// Read side paired with a [`SessionHandle`], owned by the session event loop.
#[derive(Debug)]
pub struct SessionOutlet {
    /// Frames waiting to be written to the socket.
    pub outbound: mpsc::Receiver<Message>,
    /// Fires when the bridge wants the socket closed.
    pub closer: Arc<Notify>,
}

impl SessionHandle {
    /// Creates a connected handle/outlet pair with `capacity` buffered frames.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, SessionOutlet) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closer = Arc::new(Notify::new());
        (
            Self {
                outbound: tx,
                closer: Arc::clone(&closer),
            },
            SessionOutlet {
                outbound: rx,
                closer,
            },
        )
    }

    /// Returns `true` if a frame could be queued right now.
    #[inline]
    #[must_use]
    pub fn is_writable(&self) -> bool {
        !self.outbound.is_closed() && self.outbound.capacity() > 0
    }

    /// Queues a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotWritable`] if the buffer is full or the
    /// event loop has gone away.
    pub fn try_deliver(&self, session_id: SessionId, message: Message) -> Result<()> {
        self.outbound.try_send(message).map_err(|e| {
            match e {
                TrySendError::Full(_) => trace!(session_id = %session_id, "Outbound buffer full"),
                TrySendError::Closed(_) => trace!(session_id = %session_id, "Outbound closed"),
            }
            Error::session_not_writable(session_id)
        })
    }

    /// Asks the session's event loop to close the socket.
    pub fn close(&self) {
        self.closer.notify_one();
    }
}

// ============================================================================
// SessionEntry
// ============================================================================

/// One registered session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Outbound handle.
    pub handle: SessionHandle,
    /// Last inbound message or successful delivery.
    pub last_activity: Instant,
    /// Registration time.
    pub connected_at: Instant,
    /// Peer details.
    pub metadata: PeerMetadata,
}

/// Read-only view of a session for status reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Session identity.
    pub id: SessionId,
    /// Time since last activity.
    pub idle: Duration,
    /// Time since registration.
    pub age: Duration,
    /// Peer details.
    pub metadata: PeerMetadata,
}

// ============================================================================
// SessionRegistry
// ============================================================================

#[derive(Debug, Default)]
struct RegistryInner {
    /// Sessions by identity.
    sessions: FxHashMap<SessionId, SessionEntry>,
    /// Identities in registration order.
    order: Vec<SessionId>,
}

/// Live sessions keyed by [`SessionId`], iterated in registration order.
///
/// Thread-safe; shared by the accept loop, every session event loop, the
/// dispatch path, and the liveness sweeper.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<RegistryInner>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session and returns its fresh identity.
    pub fn register(&self, handle: SessionHandle, metadata: PeerMetadata) -> SessionId {
        let now = Instant::now();
        let mut inner = self.inner.write();
        let id = SessionId::next();

        inner.sessions.insert(
            id,
            SessionEntry {
                handle,
                last_activity: now,
                connected_at: now,
                metadata,
            },
        );
        inner.order.push(id);

        debug!(session_id = %id, total = inner.order.len(), "Session registered");
        id
    }

    /// Refreshes a session's activity timestamp.
    ///
    /// Returns `false` if the session is not registered.
    pub fn touch(&self, id: SessionId) -> bool {
        let mut inner = self.inner.write();
        match inner.sessions.get_mut(&id) {
            Some(entry) => {
                entry.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Removes a session.
    ///
    /// Idempotent: removing an unknown id returns `None`.
    pub fn remove(&self, id: SessionId) -> Option<SessionEntry> {
        let mut inner = self.inner.write();
        let entry = inner.sessions.remove(&id)?;
        inner.order.retain(|live| *live != id);

        debug!(session_id = %id, total = inner.order.len(), "Session removed");
        Some(entry)
    }

    /// Returns live identities in registration order.
    #[must_use]
    pub fn list_live(&self) -> Vec<SessionId> {
        self.inner.read().order.clone()
    }

    /// Returns a clone of a session's outbound handle.
    #[must_use]
    pub fn handle(&self, id: SessionId) -> Option<SessionHandle> {
        self.inner
            .read()
            .sessions
            .get(&id)
            .map(|entry| entry.handle.clone())
    }

    /// Returns `true` if the session is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.inner.read().sessions.contains_key(&id)
    }

    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Returns `true` if no session is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every (identity, handle) pair in registration order.
    #[must_use]
    pub fn handles(&self) -> Vec<(SessionId, SessionHandle)> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.sessions.get(id).map(|e| (*id, e.handle.clone())))
            .collect()
    }

    /// Returns sessions idle for longer than `threshold` as of `now`.
    #[must_use]
    pub fn stale_sessions(&self, now: Instant, threshold: Duration) -> Vec<SessionId> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter(|id| {
                inner
                    .sessions
                    .get(id)
                    .is_some_and(|e| now.saturating_duration_since(e.last_activity) > threshold)
            })
            .copied()
            .collect()
    }

    /// Returns a status view of every session.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let now = Instant::now();
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| {
                inner.sessions.get(id).map(|e| SessionInfo {
                    id: *id,
                    idle: now.saturating_duration_since(e.last_activity),
                    age: now.saturating_duration_since(e.connected_at),
                    metadata: e.metadata.clone(),
                })
            })
            .collect()
    }

    /// Removes and returns every session.
    pub fn drain(&self) -> Vec<(SessionId, SessionEntry)> {
        let mut inner = self.inner.write();
        let order = std::mem::take(&mut inner.order);
        order
            .into_iter()
            .filter_map(|id| inner.sessions.remove(&id).map(|e| (id, e)))
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
