//! Bridge client with playback readiness coordination.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────────────── ClientSession task ───────────────────────┐
//!  Bridge ──WS────►│ transport ─► routing ─► ReadinessCoordinator ─► PlaybackBackend │
//!                  │                 │              ▲                                  │
//!                  │                 └─► HealthMonitor (throttled, recovers backend)   │
//!                  └──────────────────────────────────────────────────────────────────┘
//!                        ▲ commands (unlock, health, shutdown)     │ events + status
//!                        │                                         ▼
//!                              ClientHandle / presentation layer
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `transport` | Connection state machine and backoff |
//! | `backend` | [`PlaybackBackend`] trait and implementations |
//! | `coordinator` | Pending trigger queue gated on readiness |
//! | `health` | Throttled playback health checks |
//! | `session` | Client task, routing, and control handle |

// ============================================================================
// Submodules
// ============================================================================

/// Playback backends.
pub mod backend;

/// Pending trigger queue.
pub mod coordinator;

/// Playback health checks.
pub mod health;

/// Client task and control handle.
pub mod session;

/// Connection state machine.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{BackendControl, ChannelBackend, ContextState, LogBackend, PlaybackBackend};
pub use coordinator::{HealthSnapshot, ReadinessCoordinator};
pub use health::{HealthMonitor, HealthStatus};
pub use session::{ClientEvent, ClientHandle, ClientSession, ClientStatus};
pub use transport::{CloseAction, ConnectionState, TransportState};
