//! Bridge server: OSC ingest plus WebSocket accept loop.
//!
//! # Architecture
//!
//! ```text
//!  Sound module                 BridgeServer                      Browsers
//! ┌────────────┐  UDP  ┌──────────────────────────────┐  WS  ┌────────────┐
//! │ OSC sender │──────►│ ingest loop ─► Bridge        │─────►│ client_1   │
//! └────────────┘       │                 │ dispatch   │─────►│ client_2   │
//!                      │ accept loop ─► session loops │─────►│ client_3   │
//!                      │ liveness sweeper             │      └────────────┘
//!                      └──────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. [`BridgeServer::bind`] - Bind both sockets and start background tasks
//! 2. Clients connect, receive `welcome`, and get OSC in round-robin order
//! 3. [`BridgeServer::shutdown`] - Stop tasks and close every session

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::protocol::decode_datagram;
use crate::task::ScheduledTask;

use super::connection::{run_session, upgrade};
use super::core::{Bridge, BridgeStatus};
use super::sweeper::LivenessSweeper;

// ============================================================================
// Constants
// ============================================================================

/// Largest OSC datagram accepted.
const MAX_DATAGRAM_SIZE: usize = 65_536;

/// Per-connection tasks, awaited on shutdown.
type SessionTasks = Arc<Mutex<JoinSet<()>>>;

/// Settings every accepted connection needs.
#[derive(Debug, Clone, Copy)]
struct SessionSettings {
    outbound_capacity: usize,
    handshake_timeout: Duration,
}

// ============================================================================
// BridgeServer
// ============================================================================

/// Running bridge: owns the listeners and every background task.
///
/// Dropping the server stops the background tasks and aborts session tasks
/// without a close frame; call [`shutdown`](Self::shutdown) to close live
/// sessions cleanly.
///
/// # Example
///
/// ```ignore
/// let server = BridgeServer::bind(BridgeConfig::new()).await?;
/// println!("WebSocket URL: {}", server.ws_url());
/// tokio::signal::ctrl_c().await?;
/// server.shutdown().await;
/// ```
#[derive(Debug)]
pub struct BridgeServer {
    /// Shared dispatch state.
    bridge: Arc<Bridge>,
    /// Bound WebSocket address.
    ws_addr: SocketAddr,
    /// Bound OSC address.
    osc_addr: SocketAddr,
    /// Background tasks, cancelled on drop.
    tasks: Vec<ScheduledTask>,
    /// One task per accepted connection.
    sessions: SessionTasks,
    /// Bound on waiting for sessions during shutdown.
    shutdown_grace: Duration,
}

// ============================================================================
// BridgeServer - Constructor
// ============================================================================

impl BridgeServer {
    /// Binds the OSC and WebSocket sockets and starts serving.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if the configuration is invalid
    /// - [`Error::Io`](crate::Error::Io) if either socket fails to bind
    pub async fn bind(config: BridgeConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.ws_addr).await?;
        let socket = UdpSocket::bind(config.osc_addr).await?;
        let ws_addr = listener.local_addr()?;
        let osc_addr = socket.local_addr()?;

        let bridge = Arc::new(Bridge::new());
        let sessions = SessionTasks::default();
        let settings = SessionSettings {
            outbound_capacity: config.outbound_capacity,
            handshake_timeout: config.handshake_timeout,
        };

        let accept = ScheduledTask::spawn(
            "ws-accept",
            accept_loop(Arc::clone(&bridge), listener, Arc::clone(&sessions), settings),
        );
        let ingest = ScheduledTask::spawn("osc-ingest", ingest_loop(Arc::clone(&bridge), socket));
        let sweeper = LivenessSweeper::new(
            Arc::clone(&bridge),
            config.sweep_interval,
            config.stale_timeout,
        )
        .spawn();

        info!(%osc_addr, %ws_addr, "OSC WebSocket bridge started");

        Ok(Self {
            bridge,
            ws_addr,
            osc_addr,
            tasks: vec![accept, ingest, sweeper],
            sessions,
            shutdown_grace: config.shutdown_grace,
        })
    }
}

// ============================================================================
// BridgeServer - Public API
// ============================================================================

impl BridgeServer {
    /// Returns the shared bridge.
    #[inline]
    #[must_use]
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Returns the bound WebSocket address.
    #[inline]
    #[must_use]
    pub fn ws_addr(&self) -> SocketAddr {
        self.ws_addr
    }

    /// Returns the bound OSC address.
    #[inline]
    #[must_use]
    pub fn osc_addr(&self) -> SocketAddr {
        self.osc_addr
    }

    /// Returns the WebSocket URL clients should use.
    ///
    /// Format: `ws://{ip}:{port}`
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.ws_addr)
    }

    /// Returns a diagnostic snapshot.
    #[inline]
    #[must_use]
    pub fn status(&self) -> BridgeStatus {
        self.bridge.status()
    }

    /// Stops all background tasks, closes every session, and waits (up to
    /// the configured grace period) for session tasks to send their close
    /// frames.
    pub async fn shutdown(mut self) {
        info!("OSC WebSocket bridge shutting down");

        for task in self.tasks.drain(..) {
            task.cancel().await;
        }
        self.bridge.close_all();

        let mut sessions = std::mem::take(&mut *self.sessions.lock());
        let pending = sessions.len();
        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = sessions.len(),
                "Sessions did not close within grace period, aborting"
            );
        }
        debug!(pending, "Session tasks finished");

        info!("OSC WebSocket bridge shutdown complete");
    }
}

// ============================================================================
// Background Loops
// ============================================================================

/// Accepts TCP connections and hands each to its own session task.
async fn accept_loop(
    bridge: Arc<Bridge>,
    listener: TcpListener,
    sessions: SessionTasks,
    settings: SessionSettings,
) {
    debug!("Accept loop started");

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let mut tracked = sessions.lock();
                while tracked.try_join_next().is_some() {}
                tracked.spawn(handle_connection(Arc::clone(&bridge), stream, addr, settings));
            }
            Err(e) => {
                error!(error = %e, "Accept failed");
            }
        }
    }
}

/// Upgrades one connection and runs its session to completion.
async fn handle_connection(
    bridge: Arc<Bridge>,
    stream: TcpStream,
    addr: SocketAddr,
    settings: SessionSettings,
) {
    debug!(%addr, "New TCP connection");

    match upgrade(stream, addr, settings.handshake_timeout).await {
        Ok((ws_stream, metadata)) => {
            info!(
                %addr,
                user_agent = metadata.user_agent.as_deref().unwrap_or("unknown"),
                "WebSocket connection established"
            );
            run_session(bridge, ws_stream, metadata, settings.outbound_capacity).await;
        }
        Err(e) => {
            warn!(error = %e, %addr, "Connection handling failed");
        }
    }
}

/// Receives OSC datagrams and dispatches each contained message.
async fn ingest_loop(bridge: Arc<Bridge>, socket: UdpSocket) {
    debug!("OSC ingest loop started");
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                error!(error = %e, "OSC receive failed");
                continue;
            }
        };

        match decode_datagram(&buf[..len]) {
            Ok(messages) => {
                for message in &messages {
                    debug!(%peer, address = %message.address, args = message.args.len(), "Received OSC message");
                    bridge.dispatch(message);
                }
            }
            Err(e) => {
                warn!(%peer, len, error = %e, "Dropping undecodable OSC datagram");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
