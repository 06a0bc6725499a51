//! OSC Fanout - Round-robin OSC to WebSocket distribution.
//!
//! This library routes real-time control messages from a sound module
//! (OSC over UDP) to a dynamic set of browser sessions over WebSocket, and
//! coordinates each client's playback readiness so triggers are neither
//! dropped silently nor played out of order.
//!
//! # Architecture
//!
//! The system has two halves:
//!
//! - **Bridge**: one UDP ingest, many WebSocket sessions; each OSC message
//!   goes to exactly one session, cycling in join order
//! - **Client**: reconnecting WebSocket client whose triggers wait in a FIFO
//!   queue until playback is authorized
//!
//! Key design principles:
//!
//! - [`Bridge`] is an owned service object shared via `Arc`
//! - A slow or dead session is evicted, never waited on
//! - Every periodic activity is a task cancelled with its owner
//! - Triggers that miss their moment are discarded, not replayed late
//!
//! # Quick Start
//!
//! ```no_run
//! use osc_fanout::{BridgeConfig, BridgeServer, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = BridgeServer::bind(BridgeConfig::new()).await?;
//!     println!("Clients connect to {}", server.ws_url());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | OSC ingest, session registry, round-robin dispatch |
//! | [`client`] | Reconnecting client, readiness coordinator, health monitor |
//! | [`config`] | Bridge and client configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Session identifiers |
//! | [`protocol`] | OSC decoding and JSON wire frames |
//! | [`task`] | Owned background tasks |

// ============================================================================
// Modules
// ============================================================================

/// OSC to WebSocket distribution bridge.
///
/// - [`BridgeServer`] - Binds sockets and runs background tasks
/// - [`Bridge`] - Round-robin dispatch over the live session set
pub mod bridge;

/// Bridge client with playback readiness coordination.
///
/// Use [`ClientSession::spawn`] to start a client.
pub mod client;

/// Bridge and client configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Session identifiers.
pub mod identifiers;

/// OSC decoding and WebSocket frame types.
pub mod protocol;

/// Owned background tasks.
pub mod task;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{Bridge, BridgeServer, BridgeStatus, DispatchOutcome, LivenessSweeper};

// Client types
pub use client::{
    ClientEvent, ClientHandle, ClientSession, ClientStatus, LogBackend, PlaybackBackend,
    ReadinessCoordinator, TransportState,
};

// Configuration types
pub use config::{BridgeConfig, ClientConfig, ReconnectPolicy};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::SessionId;

// Protocol types
pub use protocol::{ClientFrame, OscMessage, ServerFrame, TriggerParams};
