//! Readiness coordinator.
//!
//! Triggers that arrive before playback is authorized are held in a bounded
//! FIFO queue and played in arrival order once the backend is ready. After a
//! reconnection or a detected failure the queue is discarded instead: a
//! trigger that missed its moment is not replayed late.
//!
//! ```text
//!  trigger ──► ready? ──yes──► backend.trigger
//!                │
//!                no
//!                ▼
//!          pending queue ──set_ready(true)──► drain in order
//!                │
//!                └──recover / clear_pending──► discarded
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::TriggerParams;

use super::backend::{ContextState, PlaybackBackend};

// ============================================================================
// HealthSnapshot
// ============================================================================

/// Inputs to a health evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    /// Whether playback has ever started.
    pub initialized: bool,
    /// Whether triggers are being played.
    pub ready: bool,
    /// Backend context state.
    pub context_state: ContextState,
    /// Triggers waiting in the queue.
    pub pending_count: usize,
}

// ============================================================================
// ReadinessCoordinator
// ============================================================================

/// Gates triggers on playback readiness.
#[derive(Debug)]
pub struct ReadinessCoordinator {
    backend: Arc<dyn PlaybackBackend>,
    pending: VecDeque<TriggerParams>,
    capacity: usize,
    ready: bool,
    initialization_attempted: bool,
    has_been_ready: bool,
    overflowed: u64,
}

impl ReadinessCoordinator {
    /// Creates a coordinator holding at most `capacity` pending triggers.
    #[must_use]
    pub fn new(backend: Arc<dyn PlaybackBackend>, capacity: usize) -> Self {
        Self {
            backend,
            pending: VecDeque::new(),
            capacity: capacity.max(1),
            ready: false,
            initialization_attempted: false,
            has_been_ready: false,
            overflowed: 0,
        }
    }

    /// Returns the backend.
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn PlaybackBackend> {
        &self.backend
    }

    /// Returns `true` if triggers play immediately.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Returns `true` if ready and the backend reports it can play.
    #[inline]
    #[must_use]
    pub fn playback_ready(&self) -> bool {
        self.ready && self.backend.is_ready()
    }

    /// Returns the number of queued triggers.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` once [`initialize`](Self::initialize) or
    /// [`recover`](Self::recover) has run.
    #[inline]
    #[must_use]
    pub fn initialization_attempted(&self) -> bool {
        self.initialization_attempted
    }

    /// Returns `true` once the coordinator has become ready at least once.
    ///
    /// Until then a start attempt drains the queue; afterwards a restart
    /// discards it.
    #[inline]
    #[must_use]
    pub fn has_been_ready(&self) -> bool {
        self.has_been_ready
    }

    /// Returns how many triggers were dropped because the queue was full.
    #[inline]
    #[must_use]
    pub fn overflowed(&self) -> u64 {
        self.overflowed
    }

    /// Captures the state the health monitor evaluates.
    #[must_use]
    pub fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            initialized: self.has_been_ready,
            ready: self.ready,
            context_state: self.backend.context_state(),
            pending_count: self.pending.len(),
        }
    }

    /// Plays `params` now if ready, otherwise queues it.
    ///
    /// When the queue is full the oldest trigger is dropped.
    pub async fn on_trigger_arrived(&mut self, params: TriggerParams) {
        if self.ready {
            self.play(&params).await;
            return;
        }

        if self.pending.len() >= self.capacity {
            self.pending.pop_front();
            self.overflowed += 1;
            warn!(
                capacity = self.capacity,
                overflowed = self.overflowed,
                "Pending queue full, dropped oldest trigger"
            );
        }
        self.pending.push_back(params);
        debug!(pending = self.pending.len(), "Trigger queued until ready");
    }

    /// Sets the readiness flag.
    ///
    /// A transition to ready plays every queued trigger in arrival order and
    /// returns how many were drained.
    pub async fn set_ready(&mut self, ready: bool) -> usize {
        let was_ready = self.ready;
        self.ready = ready;
        self.has_been_ready |= ready;

        if ready && !was_ready {
            self.drain().await
        } else {
            0
        }
    }

    /// Discards every queued trigger and returns how many were discarded.
    pub fn clear_pending(&mut self) -> usize {
        let cleared = self.pending.len();
        self.pending.clear();
        if cleared > 0 {
            info!(cleared, "Cleared stale pending triggers");
        }
        cleared
    }

    /// First-time start: initializes the backend and drains the queue.
    ///
    /// Returns the number of triggers drained.
    ///
    /// # Errors
    ///
    /// Returns the backend's error; the coordinator stays not ready and keeps
    /// queueing.
    pub async fn initialize(&mut self) -> Result<usize> {
        self.initialization_attempted = true;
        self.backend.initialize().await?;
        Ok(self.set_ready(true).await)
    }

    /// Restart after a reconnection or detected failure: re-initializes the
    /// backend, then discards the queue.
    ///
    /// Returns the number of triggers discarded.
    ///
    /// # Errors
    ///
    /// Returns the backend's error; the coordinator is left not ready.
    pub async fn recover(&mut self) -> Result<usize> {
        self.initialization_attempted = true;
        self.ready = false;
        self.backend.initialize().await?;
        let cleared = self.clear_pending();
        self.ready = true;
        self.has_been_ready = true;
        Ok(cleared)
    }

    async fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Some(params) = self.pending.pop_front() {
            self.play(&params).await;
            drained += 1;
        }
        if drained > 0 {
            info!(drained, "Played pending triggers");
        }
        drained
    }

    async fn play(&self, params: &TriggerParams) {
        if let Err(e) = self.backend.trigger(params).await {
            warn!(error = %e, "Trigger failed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use crate::client::backend::{BackendControl, ChannelBackend};
    use crate::error::Error;
    use crate::protocol::ParamValue;

    fn trigger(note: f64) -> TriggerParams {
        let mut params = TriggerParams::new();
        params.insert("note".to_string(), ParamValue::Number(note));
        params
    }

    fn note(params: &TriggerParams) -> f64 {
        params.get("note").and_then(ParamValue::as_f64).unwrap()
    }

    fn coordinator(
        capacity: usize,
    ) -> (
        ReadinessCoordinator,
        BackendControl,
        mpsc::UnboundedReceiver<TriggerParams>,
    ) {
        let (backend, control, rx) = ChannelBackend::new();
        (ReadinessCoordinator::new(Arc::new(backend), capacity), control, rx)
    }

    fn received(rx: &mut mpsc::UnboundedReceiver<TriggerParams>) -> Vec<f64> {
        let mut notes = Vec::new();
        while let Ok(params) = rx.try_recv() {
            notes.push(note(&params));
        }
        notes
    }

    /// Backend that rejects one specific note.
    #[derive(Debug, Default)]
    struct PickyBackend {
        played: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl PlaybackBackend for PickyBackend {
        async fn initialize(&self) -> Result<()> {
            Ok(())
        }

        async fn trigger(&self, params: &TriggerParams) -> Result<()> {
            let n = note(params);
            if n == 2.0 {
                return Err(Error::playback("rejected"));
            }
            self.played.lock().push(n);
            Ok(())
        }

        fn is_ready(&self) -> bool {
            true
        }

        fn context_state(&self) -> ContextState {
            ContextState::Running
        }
    }

    #[tokio::test]
    async fn test_queues_until_ready_then_drains_in_order() {
        let (mut coord, _control, mut rx) = coordinator(16);

        for n in 1..=5 {
            coord.on_trigger_arrived(trigger(f64::from(n))).await;
        }
        assert_eq!(coord.pending_count(), 5);
        assert!(received(&mut rx).is_empty());

        assert_eq!(coord.set_ready(true).await, 5);
        assert_eq!(coord.pending_count(), 0);
        assert_eq!(received(&mut rx), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_plays_immediately_when_ready() {
        let (mut coord, _control, mut rx) = coordinator(16);
        coord.set_ready(true).await;

        coord.on_trigger_arrived(trigger(7.0)).await;
        assert_eq!(coord.pending_count(), 0);
        assert_eq!(received(&mut rx), vec![7.0]);
    }

    #[tokio::test]
    async fn test_clear_pending_discards() {
        let (mut coord, _control, mut rx) = coordinator(16);
        for n in 0..4 {
            coord.on_trigger_arrived(trigger(f64::from(n))).await;
        }

        assert_eq!(coord.clear_pending(), 4);
        assert_eq!(coord.pending_count(), 0);

        coord.set_ready(true).await;
        assert!(received(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_set_ready_false_does_not_drain() {
        let (mut coord, _control, mut rx) = coordinator(16);
        coord.on_trigger_arrived(trigger(1.0)).await;

        assert_eq!(coord.set_ready(false).await, 0);
        assert_eq!(coord.pending_count(), 1);
        assert!(received(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_repeated_ready_drains_once() {
        let (mut coord, _control, mut rx) = coordinator(16);
        coord.on_trigger_arrived(trigger(1.0)).await;

        assert_eq!(coord.set_ready(true).await, 1);
        assert_eq!(coord.set_ready(true).await, 0);
        assert_eq!(received(&mut rx), vec![1.0]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest() {
        let (mut coord, _control, mut rx) = coordinator(3);
        for n in 1..=5 {
            coord.on_trigger_arrived(trigger(f64::from(n))).await;
        }

        assert_eq!(coord.pending_count(), 3);
        assert_eq!(coord.overflowed(), 2);

        coord.set_ready(true).await;
        assert_eq!(received(&mut rx), vec![3.0, 4.0, 5.0]);
    }

    #[tokio::test]
    async fn test_drain_continues_past_failures() {
        let backend = Arc::new(PickyBackend::default());
        let mut coord = ReadinessCoordinator::new(Arc::clone(&backend) as Arc<dyn PlaybackBackend>, 8);

        for n in 1..=3 {
            coord.on_trigger_arrived(trigger(f64::from(n))).await;
        }
        assert_eq!(coord.set_ready(true).await, 3);
        assert_eq!(*backend.played.lock(), vec![1.0, 3.0]);
    }

    #[tokio::test]
    async fn test_initialize_failure_keeps_queueing() {
        let (mut coord, control, mut rx) = coordinator(8);
        control.refuse_start(true);

        coord.on_trigger_arrived(trigger(1.0)).await;
        assert!(coord.initialize().await.is_err());
        assert!(coord.initialization_attempted());
        assert!(!coord.is_ready());

        coord.on_trigger_arrived(trigger(2.0)).await;
        assert_eq!(coord.pending_count(), 2);

        control.refuse_start(false);
        assert_eq!(coord.initialize().await.unwrap(), 2);
        assert_eq!(received(&mut rx), vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_has_been_ready_only_after_success() {
        let (mut coord, control, _rx) = coordinator(8);
        assert!(!coord.has_been_ready());

        control.refuse_start(true);
        assert!(coord.initialize().await.is_err());
        assert!(!coord.has_been_ready());

        control.refuse_start(false);
        coord.initialize().await.unwrap();
        assert!(coord.has_been_ready());

        coord.set_ready(false).await;
        assert!(coord.has_been_ready());
    }

    #[tokio::test]
    async fn test_recover_discards_instead_of_replaying() {
        let (mut coord, control, mut rx) = coordinator(8);
        coord.initialize().await.unwrap();
        coord.set_ready(false).await;

        coord.on_trigger_arrived(trigger(1.0)).await;
        coord.on_trigger_arrived(trigger(2.0)).await;

        assert_eq!(coord.recover().await.unwrap(), 2);
        assert!(coord.is_ready());
        assert_eq!(coord.pending_count(), 0);
        assert_eq!(control.init_calls(), 2);
        assert!(received(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_recover_failure_leaves_not_ready() {
        let (mut coord, control, _rx) = coordinator(8);
        coord.initialize().await.unwrap();
        control.refuse_start(true);

        assert!(coord.recover().await.is_err());
        assert!(!coord.is_ready());

        coord.on_trigger_arrived(trigger(1.0)).await;
        assert_eq!(coord.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_health_snapshot() {
        let (mut coord, control, _rx) = coordinator(8);
        let snapshot = coord.health_snapshot();
        assert!(!snapshot.initialized);
        assert!(!snapshot.ready);

        coord.initialize().await.unwrap();
        assert!(coord.health_snapshot().ready);
        assert!(coord.playback_ready());

        control.set_context_state(ContextState::Suspended);
        let snapshot = coord.health_snapshot();
        assert!(snapshot.initialized);
        assert!(snapshot.ready);
        assert!(!coord.playback_ready());
        assert_eq!(snapshot.context_state, ContextState::Suspended);
    }
}
