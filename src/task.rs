//! Owned background tasks.
//!
//! A [`ScheduledTask`] aborts its tokio task when dropped, so a periodic job
//! can never outlive the component that started it.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::trace;

// ============================================================================
// ScheduledTask
// ============================================================================

/// A spawned task that is cancelled when this handle is dropped.
#[derive(Debug)]
pub struct ScheduledTask {
    /// Task name for diagnostics.
    name: &'static str,
    /// Underlying tokio handle.
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Spawns `future` on the current runtime.
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        trace!(task = name, "Scheduled task started");
        Self {
            name,
            handle: Some(tokio::spawn(future)),
        }
    }

    /// Returns `true` once the task has completed or been cancelled.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the task to finish on its own.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
            trace!(task = self.name, "Scheduled task joined");
        }
    }

    /// Cancels the task and waits for it to stop.
    pub async fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
            trace!(task = self.name, "Scheduled task cancelled");
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            trace!(task = self.name, "Scheduled task dropped");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
