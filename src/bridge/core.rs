//! Distribution bridge: round-robin fan-out of OSC messages.
//!
//! The [`Bridge`] owns the session registry and the dispatch cursor. It is
//! shared behind an `Arc` by the accept loop, every session event loop, the
//! OSC ingest loop, and the liveness sweeper.
//!
//! # Dispatch
//!
//! ```text
//! OSC message ──► snapshot live set ──► empty?  ──► drop
//!                        │
//!                        ├─ one session ──► deliver
//!                        │
//!                        └─ live[cursor % len] ──► deliver ──► cursor += 1
//!                                  │
//!                                  └─ unwritable ──► evict, retry smaller set
//! ```
//!
//! Dispatch is a fairness policy, not a reliability one: with K stable
//! sessions, every K consecutive messages reach each session exactly once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::{OscMessage, ServerFrame, now_millis};

use super::registry::{PeerMetadata, SessionHandle, SessionRegistry};

// ============================================================================
// Types
// ============================================================================

/// Result of dispatching one OSC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Queued for this session.
    Delivered(SessionId),
    /// No session could take it.
    Dropped,
}

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Transport closed or errored.
    Closed,
    /// Transport could not accept a frame.
    Unwritable,
    /// No activity within the staleness window.
    Stale,
    /// Bridge shutting down.
    Shutdown,
}

impl fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Unwritable => "unwritable",
            Self::Stale => "stale",
            Self::Shutdown => "shutdown",
        })
    }
}

/// Dispatch counters.
#[derive(Debug, Default)]
struct BridgeStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

// ============================================================================
// Status
// ============================================================================

/// Point-in-time view of the bridge for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    /// Live sessions.
    pub connected_clients: usize,
    /// Raw dispatch cursor.
    pub current_round_robin_index: usize,
    /// Messages delivered.
    pub delivered: u64,
    /// Messages dropped for lack of a writable session.
    pub dropped: u64,
    /// Sessions removed as unwritable or stale.
    pub evicted: u64,
    /// Per-session details in registration order.
    pub clients: Vec<ClientStatusEntry>,
}

/// One session in a [`BridgeStatus`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatusEntry {
    /// Session identity.
    pub id: String,
    /// Milliseconds since last activity.
    pub idle_ms: u64,
    /// Peer user agent.
    pub user_agent: String,
    /// Peer address.
    pub ip: Option<String>,
}

// ============================================================================
// Bridge
// ============================================================================

/// Session registry plus round-robin dispatch state.
///
/// # Example
///
/// ```ignore
/// let bridge = Bridge::new();
/// let (handle, outlet) = SessionHandle::channel(64);
/// let id = bridge.admit(handle, PeerMetadata::default());
///
/// match bridge.dispatch(&OscMessage::new("/onset", args)) {
///     DispatchOutcome::Delivered(target) => assert_eq!(target, id),
///     DispatchOutcome::Dropped => unreachable!(),
/// }
/// ```
#[derive(Debug, Default)]
pub struct Bridge {
    /// Live sessions.
    registry: SessionRegistry,
    /// Round-robin position; taken for the whole of each dispatch.
    cursor: Mutex<usize>,
    /// Counters.
    stats: BridgeStats,
}

impl Bridge {
    /// Creates a bridge with no sessions.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }
}

// ============================================================================
// Bridge - Membership
// ============================================================================

impl Bridge {
    /// Registers a new session, sends its `welcome`, and announces the new
    /// client count to everyone.
    pub fn admit(&self, handle: SessionHandle, metadata: PeerMetadata) -> SessionId {
        let id = self.registry.register(handle.clone(), metadata);
        let total = self.registry.len();

        info!(session_id = %id, total, "Client connected");

        let welcome = ServerFrame::welcome(id.to_string(), total);
        if let Err(e) = welcome
            .to_message()
            .and_then(|message| handle.try_deliver(id, message))
        {
            warn!(session_id = %id, error = %e, "Failed to send welcome");
        }

        self.broadcast_client_count();
        id
    }

    /// Records inbound activity for a session.
    #[inline]
    pub fn touch(&self, id: SessionId) {
        if !self.registry.touch(id) {
            trace!(session_id = %id, "Touch for unregistered session");
        }
    }

    /// Unregisters a session, closes its transport, and announces the new
    /// client count.
    ///
    /// The session is removed before its socket is asked to close, so no
    /// later dispatch can select it. Returns `false` if it was already gone.
    pub fn remove_session(&self, id: SessionId, cause: RemovalCause) -> bool {
        if !self.unregister(id, cause) {
            return false;
        }
        self.broadcast_client_count();
        true
    }

    /// Removes without broadcasting. Returns `false` if already gone.
    fn unregister(&self, id: SessionId, cause: RemovalCause) -> bool {
        let Some(entry) = self.registry.remove(id) else {
            return false;
        };
        entry.handle.close();

        if matches!(cause, RemovalCause::Unwritable | RemovalCause::Stale) {
            self.stats.evicted.fetch_add(1, Ordering::Relaxed);
        }

        info!(
            session_id = %id,
            %cause,
            total = self.registry.len(),
            "Client removed"
        );
        true
    }

    /// Sends the current `clientCount` to every live session.
    ///
    /// Sessions that cannot take the frame are evicted and the count is
    /// re-announced to the rest, until a pass succeeds everywhere.
    pub fn broadcast_client_count(&self) {
        loop {
            let count = self.registry.len();
            if count == 0 {
                return;
            }

            let message = match ServerFrame::client_count(count).to_message() {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize client count");
                    return;
                }
            };

            let failed: Vec<SessionId> = self
                .registry
                .handles()
                .into_iter()
                .filter(|(id, handle)| handle.try_deliver(*id, message.clone()).is_err())
                .map(|(id, _)| id)
                .collect();

            if failed.is_empty() {
                debug!(count, "Client count broadcast");
                return;
            }

            for id in failed {
                self.unregister(id, RemovalCause::Unwritable);
            }
        }
    }

    /// Evicts sessions idle for longer than `stale_timeout`.
    ///
    /// Returns the evicted identities.
    pub fn sweep_stale(&self, now: Instant, stale_timeout: Duration) -> Vec<SessionId> {
        let stale = self.registry.stale_sessions(now, stale_timeout);
        let evicted: Vec<SessionId> = stale
            .into_iter()
            .filter(|id| self.unregister(*id, RemovalCause::Stale))
            .collect();

        if !evicted.is_empty() {
            info!(count = evicted.len(), "Removed stale clients");
            self.broadcast_client_count();
        }
        evicted
    }

    /// Closes and unregisters every session.
    pub fn close_all(&self) {
        for (id, entry) in self.registry.drain() {
            entry.handle.close();
            debug!(session_id = %id, cause = %RemovalCause::Shutdown, "Client closed");
        }
        *self.cursor.lock() = 0;
    }
}

// ============================================================================
// Bridge - Dispatch
// ============================================================================

impl Bridge {
    /// Routes one OSC message to the next session in round-robin order.
    pub fn dispatch(&self, message: &OscMessage) -> DispatchOutcome {
        let mut evicted = false;
        let outcome = {
            let mut cursor = self.cursor.lock();
            let bound = self.registry.len();
            let mut outcome = DispatchOutcome::Dropped;

            // Each failed attempt removes a session, so `bound` retries
            // always reach the empty set.
            for _ in 0..=bound {
                let live = self.registry.list_live();
                if live.is_empty() {
                    *cursor = 0;
                    break;
                }

                let index = if live.len() == 1 {
                    0
                } else {
                    *cursor % live.len()
                };
                let target = live[index];

                match self.deliver(target, message) {
                    Ok(()) => {
                        if live.len() > 1 {
                            *cursor = (index + 1) % live.len();
                        }
                        outcome = DispatchOutcome::Delivered(target);
                        break;
                    }
                    Err(Error::Json(e)) => {
                        warn!(address = %message.address, error = %e, "Failed to serialize OSC frame");
                        break;
                    }
                    Err(e) => {
                        debug!(session_id = %target, error = %e, "Client no longer available");
                        evicted |= self.unregister(target, RemovalCause::Unwritable);
                    }
                }
            }
            outcome
        };

        match outcome {
            DispatchOutcome::Delivered(target) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                trace!(session_id = %target, address = %message.address, "OSC message delivered");
            }
            DispatchOutcome::Dropped => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(address = %message.address, "No clients available, dropping OSC message");
            }
        }

        if evicted {
            self.broadcast_client_count();
        }
        outcome
    }

    /// Queues an `osc` frame for one session and refreshes its activity.
    fn deliver(&self, target: SessionId, message: &OscMessage) -> Result<()> {
        let handle = self
            .registry
            .handle(target)
            .ok_or_else(|| Error::session_not_found(target))?;

        let frame = ServerFrame::Osc {
            address: message.address.clone(),
            args: message.args.clone(),
            timestamp: now_millis(),
            client_id: target.to_string(),
        };
        handle.try_deliver(target, frame.to_message()?)?;
        self.registry.touch(target);
        Ok(())
    }
}

// ============================================================================
// Bridge - Status
// ============================================================================

impl Bridge {
    /// Returns a diagnostic snapshot.
    #[must_use]
    pub fn status(&self) -> BridgeStatus {
        let clients: Vec<ClientStatusEntry> = self
            .registry
            .snapshot()
            .into_iter()
            .map(|info| ClientStatusEntry {
                id: info.id.to_string(),
                idle_ms: info.idle.as_millis() as u64,
                user_agent: info
                    .metadata
                    .user_agent
                    .unwrap_or_else(|| "unknown".to_string()),
                ip: info.metadata.addr.map(|a| a.ip().to_string()),
            })
            .collect();

        BridgeStatus {
            connected_clients: clients.len(),
            current_round_robin_index: *self.cursor.lock(),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
            clients,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
