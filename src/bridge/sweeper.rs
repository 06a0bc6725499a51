//! Liveness sweeper.
//!
//! Clients that vanish without a close frame (network loss, sleeping phone)
//! leave sessions behind that nothing else would ever remove. The sweeper
//! evicts every session idle for longer than the staleness threshold.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::identifiers::SessionId;
use crate::task::ScheduledTask;

use super::core::Bridge;

// ============================================================================
// LivenessSweeper
// ============================================================================

/// Periodic eviction of stale sessions.
#[derive(Debug, Clone)]
pub struct LivenessSweeper {
    /// Shared bridge.
    bridge: Arc<Bridge>,
    /// Time between sweeps.
    interval: Duration,
    /// Inactivity threshold.
    stale_timeout: Duration,
}

impl LivenessSweeper {
    /// Creates a sweeper for `bridge`.
    #[inline]
    #[must_use]
    pub fn new(bridge: Arc<Bridge>, interval: Duration, stale_timeout: Duration) -> Self {
        Self {
            bridge,
            interval,
            stale_timeout,
        }
    }

    /// Runs one sweep now and returns the evicted sessions.
    pub fn sweep_once(&self) -> Vec<SessionId> {
        let evicted = self.bridge.sweep_stale(Instant::now(), self.stale_timeout);
        debug!(
            evicted = evicted.len(),
            remaining = self.bridge.session_count(),
            "Liveness sweep complete"
        );
        evicted
    }

    /// Starts sweeping on the configured interval.
    ///
    /// Sweeping stops when the returned task is dropped.
    #[must_use]
    pub fn spawn(self) -> ScheduledTask {
        ScheduledTask::spawn("liveness-sweeper", async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep_once();
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bridge::registry::{PeerMetadata, SessionHandle};

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_on_schedule() {
        let bridge = Arc::new(Bridge::new());
        let (handle, _outlet) = SessionHandle::channel(8);
        let id = bridge.admit(handle, PeerMetadata::default());

        let task = LivenessSweeper::new(
            Arc::clone(&bridge),
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
        .spawn();

        // Sweeps at 30s and 60s see a session idle for at most 60s.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(bridge.registry().contains(id));

        // The sweep at 90s sees it idle for 90s.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!bridge.registry().contains(id));

        drop(task);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_session_survives() {
        let bridge = Arc::new(Bridge::new());
        let (handle, _outlet) = SessionHandle::channel(8);
        let id = bridge.admit(handle, PeerMetadata::default());

        let sweeper = LivenessSweeper::new(
            Arc::clone(&bridge),
            Duration::from_secs(30),
            Duration::from_secs(60),
        );

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(30)).await;
            bridge.touch(id);
            assert!(sweeper.sweep_once().is_empty());
        }
        assert!(bridge.registry().contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_session_is_closed() {
        let bridge = Arc::new(Bridge::new());
        let (handle, outlet) = SessionHandle::channel(8);
        let id = bridge.admit(handle, PeerMetadata::default());

        let sweeper = LivenessSweeper::new(
            Arc::clone(&bridge),
            Duration::from_secs(30),
            Duration::from_secs(60),
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(sweeper.sweep_once(), vec![id]);

        // The close request is stored for the event loop.
        tokio::time::timeout(Duration::from_millis(10), outlet.closer.notified())
            .await
            .expect("close signalled");
    }
}
