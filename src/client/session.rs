//! Client session: connection loop, message routing, and control handle.
//!
//! One tokio task per client processes everything in order: socket frames,
//! heartbeat ticks, backoff timers, and commands from the [`ClientHandle`].
//! Nothing in the coordinator is ever touched concurrently.
//!
//! # Lifecycle
//!
//! 1. [`ClientSession::spawn`] - Validate config, start the task
//! 2. Connect; on `welcome` the bridge-assigned id appears in [`ClientStatus`]
//! 3. `/plaits/state` triggers queue until [`ClientHandle::unlock`]
//! 4. Dirty close → backoff and reconnect; reconnection restarts playback
//!    and discards stale triggers
//! 5. [`ClientHandle::shutdown`] - Close with code 1000, no reconnection

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, error, info, trace, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{ClientFrame, InboundOsc, ServerFrame, voice_of};
use crate::task::ScheduledTask;

use super::backend::PlaybackBackend;
use super::coordinator::ReadinessCoordinator;
use super::health::{HealthMonitor, HealthStatus};
use super::transport::{
    self, CLEAN_CLOSE_CODE, ClientStream, CloseAction, ConnectionState, TransportState, close_code,
};

// ============================================================================
// ClientEvent
// ============================================================================

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Socket opened.
    Connected {
        /// `true` if a previous connection existed.
        reconnect: bool,
    },
    /// Socket closed.
    Disconnected {
        /// Close code, if one was received.
        code: Option<u16>,
    },
    /// Reconnection scheduled.
    Reconnecting {
        /// 1-based attempt number.
        attempt: u32,
        /// Backoff before the attempt.
        delay: Duration,
    },
    /// Reconnection ceiling exceeded; the client has stopped.
    TerminalFailure {
        /// Attempts made.
        attempts: u32,
    },
    /// Playback needs a user gesture to start again.
    AudioPrompt {
        /// Why playback stopped.
        reason: String,
    },
    /// `/onset` message.
    Onset {
        /// Frequency in Hz.
        freq: f64,
        /// Amplitude.
        amp: f64,
        /// Duration in seconds.
        dur: f64,
    },
    /// Message on an address with no dedicated handling.
    Generic {
        /// OSC address path.
        address: String,
        /// Normalized arguments.
        args: Vec<Value>,
    },
    /// Bridge membership changed.
    ClientCount(usize),
}

// ============================================================================
// ClientStatus
// ============================================================================

/// Read-only snapshot for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientStatus {
    /// Socket open.
    pub connected: bool,
    /// Identity assigned by the bridge in `welcome`.
    pub client_id: Option<String>,
    /// Triggers waiting for readiness.
    pub pending_count: usize,
    /// Triggers are being played.
    pub ready: bool,
    /// Transport lifecycle state.
    pub transport_state: TransportState,
    /// Consecutive failed attempts.
    pub reconnect_attempts: u32,
    /// Live sessions on the bridge, as last reported.
    pub total_clients: Option<usize>,
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug)]
enum ClientCommand {
    Unlock {
        reply: oneshot::Sender<Result<usize>>,
    },
    ForceHealthCheck {
        reply: oneshot::Sender<HealthStatus>,
    },
    Shutdown,
}

/// How a connected socket ended.
enum SocketEnd {
    Closed(Option<u16>),
    Shutdown,
}

// ============================================================================
// ClientHandle
// ============================================================================

/// Control handle for a running client.
///
/// Dropping the handle aborts the client task without a close handshake;
/// prefer [`shutdown`](Self::shutdown).
#[derive(Debug)]
pub struct ClientHandle {
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    status_rx: watch::Receiver<ClientStatus>,
    task: ScheduledTask,
}

impl ClientHandle {
    /// Authorizes playback (the user gesture).
    ///
    /// The first unlock starts the backend and plays queued triggers in
    /// order; later unlocks restart it and discard the queue. Returns the
    /// number of triggers played or discarded.
    ///
    /// # Errors
    ///
    /// - [`Error::BackendInit`] if the backend refuses to start
    /// - [`Error::ConnectionClosed`] if the client has stopped
    pub async fn unlock(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(ClientCommand::Unlock { reply })
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Runs a health check now, recovering if unhealthy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the client has stopped.
    pub async fn force_health_check(&self) -> Result<HealthStatus> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(ClientCommand::ForceHealthCheck { reply })
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Returns the latest status.
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        self.status_rx.borrow().clone()
    }

    /// Returns a receiver that observes every status change.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ClientStatus> {
        self.status_rx.clone()
    }

    /// Returns `true` once the client task has stopped.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Closes the connection with code 1000 and waits for the task to stop.
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(ClientCommand::Shutdown);
        self.task.join().await;
    }
}

// ============================================================================
// ClientSession
// ============================================================================

/// State owned by the client task.
#[derive(Debug)]
pub struct ClientSession {
    config: ClientConfig,
    conn: ConnectionState,
    coordinator: ReadinessCoordinator,
    health: HealthMonitor,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<ClientEvent>,
    status_tx: watch::Sender<ClientStatus>,
    client_id: Option<String>,
    total_clients: Option<usize>,
}

impl ClientSession {
    /// Starts a client.
    ///
    /// Returns the control handle and the event stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn spawn(
        config: ClientConfig,
        backend: Arc<dyn PlaybackBackend>,
    ) -> Result<(ClientHandle, mpsc::UnboundedReceiver<ClientEvent>)> {
        config.validate()?;

        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());

        let session = Self {
            conn: ConnectionState::new(config.reconnect),
            coordinator: ReadinessCoordinator::new(backend, config.pending_capacity),
            health: HealthMonitor::new(config.health_throttle, config.pending_log_threshold),
            config,
            commands,
            events,
            status_tx,
            client_id: None,
            total_clients: None,
        };

        let task = ScheduledTask::spawn("osc-client", session.run());

        let handle = ClientHandle {
            command_tx,
            status_rx,
            task,
        };
        Ok((handle, event_rx))
    }

    async fn run(mut self) {
        info!(url = %self.config.url, "Client starting");

        loop {
            if !self.conn.begin_connect() {
                break;
            }
            self.publish();

            let url = self.config.url.clone();
            let timeout = self.config.connect_timeout;
            let attempt = async move { transport::connect(&url, timeout).await };
            let action = match self.until_command(attempt).await {
                None => break,
                Some(Ok(stream)) => match self.on_open(stream).await {
                    SocketEnd::Shutdown => break,
                    SocketEnd::Closed(code) => {
                        info!(?code, "WebSocket connection closed");
                        self.client_id = None;
                        self.emit(ClientEvent::Disconnected { code });
                        self.conn.on_closed(code)
                    }
                },
                Some(Err(e)) => {
                    warn!(error = %e, "Connection attempt failed");
                    self.conn.on_connect_failed()
                }
            };

            match action {
                CloseAction::Stop => break,
                CloseAction::Reconnect { attempt, delay } => {
                    info!(
                        attempt,
                        max_attempts = self.config.reconnect.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Scheduling reconnect"
                    );
                    self.emit(ClientEvent::Reconnecting { attempt, delay });
                    self.publish();
                    if self.until_command(tokio::time::sleep(delay)).await.is_none() {
                        break;
                    }
                }
                CloseAction::GiveUp { attempts } => {
                    let err = Error::reconnect_exhausted(attempts);
                    error!(error = %err, "Client giving up");
                    self.emit(ClientEvent::TerminalFailure { attempts });
                    break;
                }
            }
        }

        self.publish();
        info!(state = %self.conn.state(), "Client stopped");
    }

    /// Drives `future` while still serving commands; `None` on shutdown.
    async fn until_command<F: Future>(&mut self, future: F) -> Option<F::Output> {
        tokio::pin!(future);
        loop {
            tokio::select! {
                output = &mut future => return Some(output),
                command = self.commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => return None,
                    Some(command) => self.handle_command(command).await,
                }
            }
        }
    }

    async fn on_open(&mut self, stream: ClientStream) -> SocketEnd {
        let reconnect = self.conn.on_connected();
        info!(url = %self.config.url, reconnect, "WebSocket connected");
        self.emit(ClientEvent::Connected { reconnect });

        if reconnect {
            self.resync().await;
        }
        self.publish();

        self.run_connected(stream).await
    }

    async fn run_connected(&mut self, stream: ClientStream) -> SocketEnd {
        let (mut ws_write, mut ws_read) = stream.split();
        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                message = ws_read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.conn.mark_seen(Instant::now());
                        self.handle_text(text.as_str()).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return SocketEnd::Closed(close_code(frame.as_ref()));
                    }
                    Some(Ok(_)) => {
                        self.conn.mark_seen(Instant::now());
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        return SocketEnd::Closed(None);
                    }
                    None => return SocketEnd::Closed(None),
                },

                _ = heartbeat.tick() => {
                    let sent = match ClientFrame::ping().to_message() {
                        Ok(ping) => ws_write.send(ping).await.map_err(Error::from),
                        Err(e) => Err(e),
                    };
                    if let Err(e) = sent {
                        warn!(error = %e, "Heartbeat failed");
                        return SocketEnd::Closed(None);
                    }
                    trace!("Heartbeat sent");
                }

                command = self.commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => {
                        self.conn.begin_close();
                        self.publish();
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client shutdown".into(),
                        };
                        let _ = ws_write.send(Message::Close(Some(frame))).await;
                        let _ = ws_write.close().await;
                        self.conn.on_closed(Some(CLEAN_CLOSE_CODE));
                        self.client_id = None;
                        self.emit(ClientEvent::Disconnected {
                            code: Some(CLEAN_CLOSE_CODE),
                        });
                        return SocketEnd::Shutdown;
                    }
                    Some(command) => self.handle_command(command).await,
                }
            }
        }
    }

    // ========================================================================
    // Routing
    // ========================================================================

    async fn handle_text(&mut self, text: &str) {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping unrecognized frame");
                return;
            }
        };

        match frame {
            ServerFrame::Welcome {
                client_id,
                total_clients,
                message,
            } => {
                info!(
                    client_id = %client_id,
                    total_clients,
                    message = message.as_deref().unwrap_or_default(),
                    "Registered with bridge"
                );
                self.client_id = Some(client_id);
                self.total_clients = Some(total_clients);
            }

            ServerFrame::ClientCount { count, .. } => {
                debug!(count, "Client count updated");
                self.total_clients = Some(count);
                self.emit(ClientEvent::ClientCount(count));
            }

            ServerFrame::Pong { timestamp } => {
                trace!(timestamp, "Pong received");
            }

            ServerFrame::Osc {
                address,
                args,
                client_id,
                ..
            } => {
                trace!(address = %address, target = %client_id, args = args.len(), "OSC frame");
                self.check_health().await;
                self.handle_osc(&address, &args).await;
            }
        }

        self.publish();
    }

    async fn handle_osc(&mut self, address: &str, args: &[Value]) {
        match InboundOsc::classify(address, args) {
            InboundOsc::State(params) => {
                let voice = voice_of(&params);
                if !self.config.accepts_voice(voice) {
                    debug!(?voice, "Ignoring filtered voice");
                    return;
                }
                self.coordinator.on_trigger_arrived(params).await;
            }
            InboundOsc::Onset { freq, amp, dur } => {
                debug!(freq, amp, dur, "Onset");
                self.emit(ClientEvent::Onset { freq, amp, dur });
            }
            InboundOsc::Generic { address, args } => {
                debug!(address = %address, "Generic OSC message");
                self.emit(ClientEvent::Generic { address, args });
            }
        }
    }

    // ========================================================================
    // Playback Health
    // ========================================================================

    async fn check_health(&mut self) {
        if let Some(HealthStatus::Unhealthy { reason }) =
            self.health.check(Instant::now(), &self.coordinator)
        {
            self.recover(&reason).await;
        }
    }

    async fn recover(&mut self, reason: &str) {
        warn!(reason, "Playback unhealthy, restarting backend");
        match self.coordinator.recover().await {
            Ok(cleared) => info!(cleared, "Playback recovered"),
            Err(e) => {
                warn!(error = %e, "Playback restart failed");
                self.emit(ClientEvent::AudioPrompt {
                    reason: reason.to_string(),
                });
            }
        }
    }

    /// Restarts playback after a reconnection; stale triggers are discarded.
    async fn resync(&mut self) {
        if self.coordinator.has_been_ready() {
            info!("Restarting playback after reconnection");
            self.recover("Reconnected").await;
        } else {
            self.coordinator.clear_pending();
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Unlock { reply } => {
                // Until playback has started once, a retry still drains the queue.
                let result = if self.coordinator.has_been_ready() {
                    self.coordinator.recover().await
                } else {
                    self.coordinator.initialize().await
                };
                if let Err(e) = &result {
                    warn!(error = %e, "Unlock failed");
                }
                self.publish();
                let _ = reply.send(result);
            }

            ClientCommand::ForceHealthCheck { reply } => {
                let status = self.health.force_check(Instant::now(), &self.coordinator);
                if let HealthStatus::Unhealthy { reason } = &status {
                    self.recover(reason).await;
                }
                self.publish();
                let _ = reply.send(status);
            }

            // Handled by the loops that own the socket.
            ClientCommand::Shutdown => {}
        }
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(ClientStatus {
            connected: self.conn.is_connected(),
            client_id: self.client_id.clone(),
            pending_count: self.coordinator.pending_count(),
            ready: self.coordinator.playback_ready(),
            transport_state: self.conn.state(),
            reconnect_attempts: self.conn.attempts(),
            total_clients: self.total_clients,
        });
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::WebSocketStream;

    use crate::client::backend::{BackendControl, ChannelBackend, ContextState};
    use crate::config::ReconnectPolicy;
    use crate::protocol::{ParamValue, TriggerParams, now_millis};

    const WAIT: Duration = Duration::from_secs(5);

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("client connects")
            .unwrap();
        tokio_tungstenite::accept_async(stream).await.unwrap()
    }

    async fn send(ws: &mut WebSocketStream<TcpStream>, frame: &ServerFrame) {
        ws.send(frame.to_message().unwrap()).await.unwrap();
    }

    fn state_frame(voice: i64, note: f64) -> ServerFrame {
        ServerFrame::Osc {
            address: "/plaits/state".to_string(),
            args: vec![
                serde_json::json!({"type": "i", "value": voice}),
                serde_json::json!({"type": "s", "value": "note"}),
                serde_json::json!({"type": "f", "value": note}),
            ],
            timestamp: now_millis(),
            client_id: "client_1_test".to_string(),
        }
    }

    fn config(url: &str) -> ClientConfig {
        ClientConfig::new(url)
            .with_reconnect(ReconnectPolicy::new(Duration::from_millis(20), 3))
            .with_health_throttle(Duration::ZERO)
    }

    fn start(
        config: ClientConfig,
    ) -> (
        ClientHandle,
        mpsc::UnboundedReceiver<ClientEvent>,
        BackendControl,
        mpsc::UnboundedReceiver<TriggerParams>,
    ) {
        let (backend, control, triggers) = ChannelBackend::new();
        let (handle, events) = ClientSession::spawn(config, Arc::new(backend)).unwrap();
        (handle, events, control, triggers)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("event in time")
            .expect("event channel open")
    }

    async fn wait_status(handle: &ClientHandle, predicate: impl FnMut(&ClientStatus) -> bool) {
        let mut rx = handle.subscribe_status();
        tokio::time::timeout(WAIT, rx.wait_for(predicate))
            .await
            .expect("status in time")
            .unwrap();
    }

    fn note(params: &TriggerParams) -> Option<f64> {
        params.get("note").and_then(ParamValue::as_f64)
    }

    #[test]
    fn test_spawn_rejects_bad_url() {
        let (backend, _control, _rx) = ChannelBackend::new();
        let result = ClientSession::spawn(ClientConfig::new("http://localhost"), Arc::new(backend));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_welcome_and_queue_until_unlock() {
        let (listener, url) = listener().await;
        let (handle, mut events, _control, mut triggers) = start(config(&url));

        let mut ws = accept(&listener).await;
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected { reconnect: false });

        send(&mut ws, &ServerFrame::welcome("client_1_abc", 1)).await;
        wait_status(&handle, |s| s.client_id.as_deref() == Some("client_1_abc")).await;

        send(&mut ws, &state_frame(0, 60.0)).await;
        send(&mut ws, &state_frame(1, 62.0)).await;
        wait_status(&handle, |s| s.pending_count == 2).await;
        assert!(triggers.try_recv().is_err());

        assert_eq!(handle.unlock().await.unwrap(), 2);
        assert_eq!(note(&triggers.recv().await.unwrap()), Some(60.0));
        assert_eq!(note(&triggers.recv().await.unwrap()), Some(62.0));

        let status = handle.status();
        assert!(status.ready);
        assert_eq!(status.pending_count, 0);
        assert_eq!(status.total_clients, Some(1));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_unlock_retry_after_refused_start_drains_in_order() {
        let (listener, url) = listener().await;
        let (handle, mut events, control, mut triggers) = start(config(&url));

        let mut ws = accept(&listener).await;
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected { reconnect: false });

        control.refuse_start(true);
        send(&mut ws, &state_frame(0, 60.0)).await;
        wait_status(&handle, |s| s.pending_count == 1).await;

        assert!(handle.unlock().await.is_err());
        send(&mut ws, &state_frame(0, 62.0)).await;
        wait_status(&handle, |s| s.pending_count == 2).await;

        control.refuse_start(false);
        assert_eq!(handle.unlock().await.unwrap(), 2);
        assert_eq!(note(&triggers.recv().await.unwrap()), Some(60.0));
        assert_eq!(note(&triggers.recv().await.unwrap()), Some(62.0));
        assert_eq!(control.init_calls(), 2);
        assert!(handle.status().ready);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_voice_filter_discards() {
        let (listener, url) = listener().await;
        let (handle, _events, _control, mut triggers) = start(config(&url).with_voice_filter([0]));

        let mut ws = accept(&listener).await;
        handle.unlock().await.unwrap();

        send(&mut ws, &state_frame(2, 50.0)).await;
        send(&mut ws, &state_frame(0, 51.0)).await;

        let played = tokio::time::timeout(WAIT, triggers.recv()).await.unwrap().unwrap();
        assert_eq!(note(&played), Some(51.0));
        assert!(triggers.try_recv().is_err());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_onset_and_generic_events() {
        let (listener, url) = listener().await;
        let (handle, mut events, _control, _triggers) = start(config(&url));

        let mut ws = accept(&listener).await;
        assert!(matches!(next_event(&mut events).await, ClientEvent::Connected { .. }));

        send(&mut ws, &ServerFrame::Osc {
            address: "/onset".to_string(),
            args: vec![440.into(), 0.5.into(), 0.25.into()],
            timestamp: now_millis(),
            client_id: "client_1_test".to_string(),
        })
        .await;
        send(&mut ws, &ServerFrame::Osc {
            address: "/other".to_string(),
            args: vec![serde_json::json!({"type": "i", "value": 3})],
            timestamp: now_millis(),
            client_id: "client_1_test".to_string(),
        })
        .await;
        send(&mut ws, &ServerFrame::client_count(4)).await;

        assert_eq!(next_event(&mut events).await, ClientEvent::Onset {
            freq: 440.0,
            amp: 0.5,
            dur: 0.25
        });
        assert_eq!(next_event(&mut events).await, ClientEvent::Generic {
            address: "/other".to_string(),
            args: vec![3.into()],
        });
        assert_eq!(next_event(&mut events).await, ClientEvent::ClientCount(4));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_cleanly() {
        let (listener, url) = listener().await;
        let (handle, _events, _control, _triggers) = start(config(&url));

        let mut ws = accept(&listener).await;
        wait_status(&handle, |s| s.connected).await;
        handle.shutdown().await;

        let code = loop {
            match tokio::time::timeout(WAIT, ws.next()).await.unwrap() {
                Some(Ok(Message::Close(frame))) => break close_code(frame.as_ref()),
                Some(Ok(_)) => {}
                other => panic!("expected close frame, got {other:?}"),
            }
        };
        assert_eq!(code, Some(CLEAN_CLOSE_CODE));
    }

    #[tokio::test]
    async fn test_reconnect_restarts_playback_and_discards_stale() {
        let (listener, url) = listener().await;
        let (handle, mut events, control, _triggers) = start(config(&url));

        let ws = accept(&listener).await;
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected { reconnect: false });
        handle.unlock().await.unwrap();
        assert_eq!(control.init_calls(), 1);

        // Abrupt drop: no close frame.
        drop(ws);

        assert!(matches!(
            next_event(&mut events).await,
            ClientEvent::Disconnected { code: None }
        ));
        assert_eq!(next_event(&mut events).await, ClientEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(20),
        });

        let _ws = accept(&listener).await;
        assert_eq!(next_event(&mut events).await, ClientEvent::Connected { reconnect: true });
        wait_status(&handle, |s| s.connected && s.reconnect_attempts == 0).await;
        assert_eq!(control.init_calls(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_terminal_failure_after_ceiling() {
        let (listener, url) = listener().await;
        drop(listener);

        let config = ClientConfig::new(url)
            .with_reconnect(ReconnectPolicy::new(Duration::from_millis(5), 2));
        let (handle, mut events, _control, _triggers) = start(config);

        assert!(matches!(
            next_event(&mut events).await,
            ClientEvent::Reconnecting { attempt: 1, .. }
        ));
        assert!(matches!(
            next_event(&mut events).await,
            ClientEvent::Reconnecting { attempt: 2, .. }
        ));
        assert_eq!(next_event(&mut events).await, ClientEvent::TerminalFailure { attempts: 2 });

        wait_status(&handle, |s| s.transport_state == TransportState::Failed).await;
        assert!(handle.unlock().await.is_err());
    }

    #[tokio::test]
    async fn test_suspended_context_triggers_recovery() {
        let (listener, url) = listener().await;
        let (handle, mut events, control, _triggers) = start(config(&url));

        let mut ws = accept(&listener).await;
        handle.unlock().await.unwrap();

        control.set_context_state(ContextState::parse("Suspended"));
        control.refuse_start(true);
        send(&mut ws, &state_frame(0, 60.0)).await;

        loop {
            if let ClientEvent::AudioPrompt { reason } = next_event(&mut events).await {
                assert_eq!(reason, "Context suspended");
                break;
            }
        }
        assert_eq!(control.init_calls(), 2);

        control.refuse_start(false);
        let status = handle.force_health_check().await.unwrap();
        assert_eq!(status.reason(), Some("not initialized"));
        assert!(handle.status().ready);

        handle.shutdown().await;
    }
}
