//! Playback backends.
//!
//! The coordinator talks to audio output only through [`PlaybackBackend`].
//! The backend is chosen once when the client starts.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`LogBackend`] | Headless listener; logs each trigger |
//! | [`ChannelBackend`] | Forwards triggers to an embedding application |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::TriggerParams;

// ============================================================================
// ContextState
// ============================================================================

/// State of the backend's playback context.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextState {
    /// Producing sound.
    Running,
    /// Paused, usually until a user gesture.
    #[default]
    Suspended,
    /// Taken away by the platform (phone call, other app).
    Interrupted,
    /// Torn down.
    Closed,
    /// Platform-specific state.
    Other(String),
}

impl ContextState {
    /// Parses a platform state name, ignoring case.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "suspended" => Self::Suspended,
            "interrupted" => Self::Interrupted,
            "closed" => Self::Closed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Returns `true` if the context has stopped producing sound.
    #[inline]
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        matches!(self, Self::Suspended | Self::Interrupted)
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Suspended => f.write_str("suspended"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::Closed => f.write_str("closed"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

// ============================================================================
// PlaybackBackend
// ============================================================================

/// Audio output driven by the readiness coordinator.
///
/// `trigger` is only called after a successful `initialize`, and never
/// concurrently.
#[async_trait]
pub trait PlaybackBackend: Send + Sync + fmt::Debug {
    /// Starts or restarts the playback context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BackendInit`] if the context cannot be started.
    async fn initialize(&self) -> Result<()>;

    /// Plays one trigger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] if the trigger is rejected.
    async fn trigger(&self, params: &TriggerParams) -> Result<()>;

    /// Returns `true` if the backend can play right now.
    fn is_ready(&self) -> bool;

    /// Returns the current context state.
    fn context_state(&self) -> ContextState;
}

// ============================================================================
// LogBackend
// ============================================================================

/// Backend that logs triggers instead of playing them.
#[derive(Debug, Default)]
pub struct LogBackend {
    started: AtomicBool,
    played: AtomicUsize,
}

impl LogBackend {
    /// Creates a backend that has not been started.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of triggers played.
    #[inline]
    #[must_use]
    pub fn played(&self) -> usize {
        self.played.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PlaybackBackend for LogBackend {
    async fn initialize(&self) -> Result<()> {
        self.started.store(true, Ordering::Release);
        info!("Log backend started");
        Ok(())
    }

    async fn trigger(&self, params: &TriggerParams) -> Result<()> {
        let count = self.played.fetch_add(1, Ordering::Relaxed) + 1;
        let params = serde_json::to_string(params)?;
        info!(count, %params, "Trigger");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn context_state(&self) -> ContextState {
        if self.is_ready() {
            ContextState::Running
        } else {
            ContextState::Suspended
        }
    }
}

// ============================================================================
// ChannelBackend
// ============================================================================

#[derive(Debug, Default)]
struct ChannelState {
    context: Mutex<ContextState>,
    refuse_start: AtomicBool,
    init_calls: AtomicUsize,
}

/// Backend that forwards triggers over a channel.
///
/// The paired [`BackendControl`] lets the owner report context changes
/// (for example the platform suspending audio) and simulate start failures.
#[derive(Debug)]
pub struct ChannelBackend {
    tx: mpsc::UnboundedSender<TriggerParams>,
    state: Arc<ChannelState>,
}

/// Control handle for a [`ChannelBackend`].
#[derive(Debug, Clone)]
pub struct BackendControl {
    state: Arc<ChannelState>,
}

impl ChannelBackend {
    /// Creates a backend, its control handle, and the trigger receiver.
    #[must_use]
    pub fn new() -> (Self, BackendControl, mpsc::UnboundedReceiver<TriggerParams>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(ChannelState::default());
        let control = BackendControl {
            state: Arc::clone(&state),
        };
        (Self { tx, state }, control, rx)
    }
}

impl BackendControl {
    /// Reports a new context state.
    pub fn set_context_state(&self, state: ContextState) {
        *self.state.context.lock() = state;
    }

    /// Makes subsequent `initialize` calls fail (or succeed again).
    pub fn refuse_start(&self, refuse: bool) {
        self.state.refuse_start.store(refuse, Ordering::Release);
    }

    /// Returns the number of `initialize` calls so far.
    #[must_use]
    pub fn init_calls(&self) -> usize {
        self.state.init_calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PlaybackBackend for ChannelBackend {
    async fn initialize(&self) -> Result<()> {
        self.state.init_calls.fetch_add(1, Ordering::AcqRel);

        if self.state.refuse_start.load(Ordering::Acquire) {
            return Err(Error::backend_init("playback context refused to start"));
        }

        *self.state.context.lock() = ContextState::Running;
        debug!("Channel backend started");
        Ok(())
    }

    async fn trigger(&self, params: &TriggerParams) -> Result<()> {
        self.tx
            .send(params.clone())
            .map_err(|_| Error::playback("trigger receiver dropped"))
    }

    fn is_ready(&self) -> bool {
        *self.state.context.lock() == ContextState::Running
    }

    fn context_state(&self) -> ContextState {
        self.state.context.lock().clone()
    }
}

// ============================================================================
// Tests
// ============================================================================
