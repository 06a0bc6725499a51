//! Playback health monitor.
//!
//! Playback can stop silently: a phone locks, the platform suspends the
//! audio context, and triggers keep arriving into nothing. The monitor is
//! consulted as messages arrive (at most once per throttle window) and
//! reports when the backend needs to be restarted.
//!
//! | Condition | Verdict |
//! |-----------|---------|
//! | Never initialized | healthy (nothing to recover yet) |
//! | Initialized, not ready | unhealthy: `not initialized` |
//! | Context suspended / interrupted | unhealthy: `Context <state>` |
//! | Otherwise | healthy |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use super::coordinator::{HealthSnapshot, ReadinessCoordinator};

// ============================================================================
// HealthStatus
// ============================================================================

/// Verdict of a health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Nothing to do.
    Healthy,
    /// Backend needs a restart.
    Unhealthy {
        /// Human-readable cause.
        reason: String,
    },
}

impl HealthStatus {
    /// Returns `true` for [`HealthStatus::Healthy`].
    #[inline]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Returns the reason for an unhealthy verdict.
    #[inline]
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Healthy => None,
            Self::Unhealthy { reason } => Some(reason),
        }
    }
}

// ============================================================================
// HealthMonitor
// ============================================================================

/// Throttled health checks over a [`ReadinessCoordinator`].
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    throttle: Duration,
    pending_log_threshold: usize,
    last_check: Option<Instant>,
}

impl HealthMonitor {
    /// Creates a monitor.
    #[must_use]
    pub fn new(throttle: Duration, pending_log_threshold: usize) -> Self {
        Self {
            throttle,
            pending_log_threshold,
            last_check: None,
        }
    }

    /// Evaluates a snapshot without throttling.
    #[must_use]
    pub fn evaluate(&self, snapshot: &HealthSnapshot) -> HealthStatus {
        if !snapshot.initialized {
            return HealthStatus::Healthy;
        }

        if !snapshot.ready {
            return HealthStatus::Unhealthy {
                reason: "not initialized".to_string(),
            };
        }

        if snapshot.context_state.is_stalled() {
            return HealthStatus::Unhealthy {
                reason: format!("Context {}", snapshot.context_state),
            };
        }

        if snapshot.pending_count > self.pending_log_threshold {
            info!(
                pending = snapshot.pending_count,
                context = %snapshot.context_state,
                "Pending triggers building up"
            );
        }

        HealthStatus::Healthy
    }

    /// Runs a check unless one ran within the throttle window.
    ///
    /// Returns `None` when throttled.
    pub fn check(&mut self, now: Instant, coordinator: &ReadinessCoordinator) -> Option<HealthStatus> {
        if let Some(last) = self.last_check
            && now.saturating_duration_since(last) < self.throttle
        {
            return None;
        }
        self.last_check = Some(now);

        let snapshot = coordinator.health_snapshot();
        let status = self.evaluate(&snapshot);
        debug!(
            initialized = snapshot.initialized,
            ready = snapshot.ready,
            context = %snapshot.context_state,
            pending = snapshot.pending_count,
            healthy = status.is_healthy(),
            "Health check"
        );
        Some(status)
    }

    /// Runs a check now, ignoring the throttle.
    pub fn force_check(&mut self, now: Instant, coordinator: &ReadinessCoordinator) -> HealthStatus {
        self.last_check = None;
        self.check(now, coordinator)
            .unwrap_or(HealthStatus::Healthy)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::client::backend::{ChannelBackend, ContextState};

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(Duration::from_secs(2), 8)
    }

    fn snapshot(initialized: bool, ready: bool, context: &str) -> HealthSnapshot {
        HealthSnapshot {
            initialized,
            ready,
            context_state: ContextState::parse(context),
            pending_count: 0,
        }
    }

    #[test]
    fn test_never_initialized_is_healthy() {
        let status = monitor().evaluate(&snapshot(false, false, "suspended"));
        assert!(status.is_healthy());
    }

    #[test]
    fn test_not_ready_is_unhealthy() {
        let status = monitor().evaluate(&snapshot(true, false, "running"));
        assert_eq!(status.reason(), Some("not initialized"));
    }

    #[test]
    fn test_suspended_context_reason() {
        let status = monitor().evaluate(&snapshot(true, true, "Suspended"));
        assert_eq!(status.reason(), Some("Context suspended"));
    }

    #[test]
    fn test_interrupted_context_reason() {
        let status = monitor().evaluate(&snapshot(true, true, "INTERRUPTED"));
        assert_eq!(status.reason(), Some("Context interrupted"));
    }

    #[test]
    fn test_pending_backlog_alone_is_healthy() {
        let mut snap = snapshot(true, true, "running");
        snap.pending_count = 100;
        assert!(monitor().evaluate(&snap).is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_is_throttled() {
        let (backend, control, _rx) = ChannelBackend::new();
        let mut coord = ReadinessCoordinator::new(Arc::new(backend), 8);
        coord.initialize().await.unwrap();
        let mut monitor = monitor();

        let start = Instant::now();
        assert_eq!(monitor.check(start, &coord), Some(HealthStatus::Healthy));

        control.set_context_state(ContextState::parse("Suspended"));
        assert_eq!(monitor.check(start + Duration::from_secs(1), &coord), None);

        let status = monitor.check(start + Duration::from_secs(2), &coord);
        assert_eq!(
            status.as_ref().and_then(HealthStatus::reason),
            Some("Context suspended")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_check_bypasses_throttle() {
        let (backend, control, _rx) = ChannelBackend::new();
        let mut coord = ReadinessCoordinator::new(Arc::new(backend), 8);
        coord.initialize().await.unwrap();
        let mut monitor = monitor();

        let now = Instant::now();
        monitor.check(now, &coord);
        control.set_context_state(ContextState::Interrupted);

        let status = monitor.force_check(now, &coord);
        assert_eq!(status.reason(), Some("Context interrupted"));
    }
}
