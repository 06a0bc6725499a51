//! OSC to WebSocket distribution bridge.
//!
//! Every OSC message received on the UDP port is delivered to exactly one
//! connected WebSocket client, cycling through clients in join order.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   UDP    ┌──────────────────┐   WebSocket   ┌────────────┐
//! │ Sound module │─────────►│  BridgeServer    │──────────────►│ Browser A  │
//! │ (OSC sender) │          │  Bridge          │──────────────►│ Browser B  │
//! └──────────────┘          │  SessionRegistry │──────────────►│ Browser C  │
//!                           └──────────────────┘               └────────────┘
//! ```
//!
//! # Session Lifecycle
//!
//! 1. Client connects and is registered with a fresh [`SessionId`](crate::SessionId)
//! 2. Client receives `welcome`, everyone receives `clientCount`
//! 3. OSC messages arrive in round-robin order; pings keep the session fresh
//! 4. Session ends on client close, failed write, or staleness sweep
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | Round-robin dispatch and membership broadcasts |
//! | `registry` | Live session table |
//! | `connection` | Per-session WebSocket event loop |
//! | `sweeper` | Periodic stale-session eviction |
//! | `server` | Socket binding and background tasks |

// ============================================================================
// Submodules
// ============================================================================

/// Per-session WebSocket event loop.
pub(crate) mod connection;

/// Round-robin dispatch.
pub mod core;

/// Live session table.
pub mod registry;

/// Socket binding and background tasks.
pub mod server;

/// Stale-session eviction.
pub mod sweeper;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::{Bridge, BridgeStatus, ClientStatusEntry, DispatchOutcome, RemovalCause};
pub use registry::{PeerMetadata, SessionHandle, SessionInfo, SessionOutlet, SessionRegistry};
pub use server::BridgeServer;
pub use sweeper::LivenessSweeper;
