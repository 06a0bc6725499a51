//! Client transport state machine.
//!
//! ```text
//!                 begin_connect            on_connected
//!  Disconnected ───────────────► Connecting ───────────► Connected
//!       ▲                            │                      │
//!       │   Reconnect{delay}         │ on_connect_failed    │ on_closed
//!       └────────────────────────────┴──────────────────────┤
//!                                                           │ code 1000
//!                      GiveUp (over the ceiling) ► Failed   └──► Disconnected (stop)
//! ```
//!
//! [`ConnectionState`] holds only the bookkeeping; the session loop owns the
//! socket and asks the state machine what to do after each transition.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::config::ReconnectPolicy;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Close code for an intentional shutdown; never followed by reconnection.
pub const CLEAN_CLOSE_CODE: u16 = 1000;

// ============================================================================
// Types
// ============================================================================

/// WebSocket stream produced by [`connect`].
pub type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// TransportState
// ============================================================================

/// Lifecycle state of the client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportState {
    /// No connection and none in progress.
    #[default]
    Disconnected,
    /// Connection attempt in flight.
    Connecting,
    /// Socket open.
    Connected,
    /// Clean close in progress.
    Closing,
    /// Reconnection ceiling exceeded.
    Failed,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// CloseAction
// ============================================================================

/// What the session loop should do after losing its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Clean close; stay disconnected.
    Stop,
    /// Try again after `delay`.
    Reconnect {
        /// 1-based attempt number.
        attempt: u32,
        /// Backoff before the attempt.
        delay: Duration,
    },
    /// Ceiling exceeded; terminal.
    GiveUp {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Reconnection bookkeeping for one client.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    policy: ReconnectPolicy,
    state: TransportState,
    attempts: u32,
    last_delay: Option<Duration>,
    ever_connected: bool,
    last_seen: Option<Instant>,
}

impl ConnectionState {
    /// Creates a disconnected state with the given backoff policy.
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: TransportState::Disconnected,
            attempts: 0,
            last_delay: None,
            ever_connected: false,
            last_seen: None,
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Returns `true` while the socket is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }

    /// Returns the consecutive failed attempts since the last connection.
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the most recently scheduled backoff.
    #[inline]
    #[must_use]
    pub fn last_delay(&self) -> Option<Duration> {
        self.last_delay
    }

    /// Returns when the last inbound frame arrived.
    #[inline]
    #[must_use]
    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// Records inbound traffic.
    #[inline]
    pub fn mark_seen(&mut self, now: Instant) {
        self.last_seen = Some(now);
    }

    /// Starts a connection attempt.
    ///
    /// Returns `false` (and changes nothing) if an attempt is already in
    /// flight, the socket is open, or the transport has failed.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            TransportState::Disconnected => {
                self.state = TransportState::Connecting;
                true
            }
            state => {
                debug!(%state, "Connect suppressed");
                false
            }
        }
    }

    /// Records a successful connection.
    ///
    /// Returns `true` if this is a reconnection.
    pub fn on_connected(&mut self) -> bool {
        let reconnect = self.ever_connected;
        self.state = TransportState::Connected;
        self.attempts = 0;
        self.last_delay = None;
        self.ever_connected = true;
        reconnect
    }

    /// Marks an intentional close in progress.
    #[inline]
    pub fn begin_close(&mut self) {
        self.state = TransportState::Closing;
    }

    /// Records a closed socket; `code` is the close code, if any was received.
    pub fn on_closed(&mut self, code: Option<u16>) -> CloseAction {
        if code == Some(CLEAN_CLOSE_CODE) || self.state == TransportState::Closing {
            self.state = TransportState::Disconnected;
            return CloseAction::Stop;
        }
        self.schedule_retry()
    }

    /// Records a failed connection attempt.
    pub fn on_connect_failed(&mut self) -> CloseAction {
        self.schedule_retry()
    }

    fn schedule_retry(&mut self) -> CloseAction {
        self.attempts += 1;
        if self.attempts > self.policy.max_attempts {
            self.state = TransportState::Failed;
            return CloseAction::GiveUp {
                attempts: self.policy.max_attempts,
            };
        }

        let delay = self.policy.delay_for(self.attempts);
        self.state = TransportState::Disconnected;
        self.last_delay = Some(delay);
        CloseAction::Reconnect {
            attempt: self.attempts,
            delay,
        }
    }
}

// ============================================================================
// Socket Helpers
// ============================================================================

/// Opens a WebSocket connection, bounded by `timeout`.
///
/// # Errors
///
/// - [`Error::ConnectionTimeout`] if the handshake does not finish in time
/// - [`Error::Connection`] if the handshake fails
pub async fn connect(url: &str, timeout: Duration) -> Result<ClientStream> {
    let attempt = tokio_tungstenite::connect_async(url);
    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

    let (stream, response) = tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| Error::connection_timeout(timeout_ms))?
        .map_err(|e| Error::connection(format!("{url}: {e}")))?;

    debug!(url, status = %response.status(), "WebSocket handshake complete");
    Ok(stream)
}

/// Extracts the numeric close code from a close frame.
#[inline]
#[must_use]
pub fn close_code(frame: Option<&CloseFrame>) -> Option<u16> {
    frame.map(|f| u16::from(f.code))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(Duration::from_secs(2), 5)
    }

    #[test]
    fn test_backoff_sequence_then_give_up() {
        let mut conn = ConnectionState::new(policy());
        let mut delays = Vec::new();

        loop {
            assert!(conn.begin_connect());
            match conn.on_connect_failed() {
                CloseAction::Reconnect { attempt, delay } => {
                    assert_eq!(attempt as usize, delays.len() + 1);
                    delays.push(delay.as_secs());
                }
                CloseAction::GiveUp { attempts } => {
                    assert_eq!(attempts, 5);
                    break;
                }
                CloseAction::Stop => panic!("failure never stops cleanly"),
            }
        }

        assert_eq!(delays, vec![2, 4, 8, 16, 32]);
        assert_eq!(conn.state(), TransportState::Failed);
        assert!(!conn.begin_connect());
    }

    #[test]
    fn test_clean_close_does_not_reconnect() {
        let mut conn = ConnectionState::new(policy());
        conn.begin_connect();
        conn.on_connected();

        assert_eq!(conn.on_closed(Some(CLEAN_CLOSE_CODE)), CloseAction::Stop);
        assert_eq!(conn.state(), TransportState::Disconnected);
        assert_eq!(conn.attempts(), 0);
    }

    #[test]
    fn test_intentional_close_stops_regardless_of_code() {
        let mut conn = ConnectionState::new(policy());
        conn.begin_connect();
        conn.on_connected();
        conn.begin_close();

        assert_eq!(conn.on_closed(None), CloseAction::Stop);
    }

    #[test]
    fn test_dirty_close_schedules_reconnect() {
        let mut conn = ConnectionState::new(policy());
        conn.begin_connect();
        conn.on_connected();

        let action = conn.on_closed(Some(1006));
        assert_eq!(
            action,
            CloseAction::Reconnect {
                attempt: 1,
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(conn.last_delay(), Some(Duration::from_secs(2)));
        assert_eq!(conn.on_closed(None), CloseAction::Reconnect {
            attempt: 2,
            delay: Duration::from_secs(4)
        });
    }

    #[test]
    fn test_success_resets_attempts() {
        let mut conn = ConnectionState::new(policy());
        conn.begin_connect();
        conn.on_connect_failed();
        conn.begin_connect();
        conn.on_connect_failed();
        assert_eq!(conn.attempts(), 2);

        conn.begin_connect();
        conn.on_connected();
        assert_eq!(conn.attempts(), 0);
        assert_eq!(conn.last_delay(), None);
    }

    #[test]
    fn test_reconnect_flag() {
        let mut conn = ConnectionState::new(policy());
        conn.begin_connect();
        assert!(!conn.on_connected());

        conn.on_closed(None);
        conn.begin_connect();
        assert!(conn.on_connected());
    }

    #[test]
    fn test_connect_suppressed_while_in_flight() {
        let mut conn = ConnectionState::new(policy());
        assert!(conn.begin_connect());
        assert!(!conn.begin_connect());
        assert_eq!(conn.state(), TransportState::Connecting);

        conn.on_connected();
        assert!(!conn.begin_connect());
    }

    #[test]
    fn test_transport_state_display() {
        assert_eq!(TransportState::Connecting.to_string(), "connecting");
        assert_eq!(TransportState::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect(&format!("ws://{addr}"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_connection_error());
    }
}
