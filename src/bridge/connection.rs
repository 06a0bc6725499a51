//! Per-session WebSocket event loop.
//!
//! Each accepted client gets one tokio task that handles:
//!
//! - Incoming frames (`ping` → `pong`, activity tracking)
//! - Outgoing frames queued by the bridge through the session's handle
//! - Close requests from the bridge (eviction, shutdown)
//!
//! A slow socket only stalls its own task; the bridge never waits on it.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::{ClientFrame, ServerFrame};

use super::core::{Bridge, RemovalCause};
use super::registry::{PeerMetadata, SessionHandle, SessionOutlet};

// ============================================================================
// Types
// ============================================================================

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

// ============================================================================
// Handshake
// ============================================================================

/// Upgrades a TCP stream to WebSocket, capturing the peer's `User-Agent`.
///
/// # Errors
///
/// - [`Error::ConnectionTimeout`] if the handshake does not finish in time
/// - [`Error::Connection`] if the upgrade fails
pub(crate) async fn upgrade(
    stream: TcpStream,
    addr: SocketAddr,
    timeout: Duration,
) -> Result<(WebSocketStream<TcpStream>, PeerMetadata)> {
    let mut user_agent = None;
    let callback = |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
        user_agent = request
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(response)
    };

    let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    let ws_stream = tokio::time::timeout(timeout, tokio_tungstenite::accept_hdr_async(stream, callback))
        .await
        .map_err(|_| Error::connection_timeout(timeout_ms))?
        .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

    Ok((ws_stream, PeerMetadata::new(addr).with_user_agent(user_agent)))
}

// ============================================================================
// Session Loop
// ============================================================================

/// Registers an upgraded connection and runs its event loop until the
/// socket closes or the bridge closes it.
pub(crate) async fn run_session(
    bridge: Arc<Bridge>,
    ws_stream: WebSocketStream<TcpStream>,
    metadata: PeerMetadata,
    outbound_capacity: usize,
) {
    let (handle, outlet) = SessionHandle::channel(outbound_capacity);
    let session_id = bridge.admit(handle, metadata);

    run_event_loop(&bridge, session_id, ws_stream, outlet).await;

    bridge.remove_session(session_id, RemovalCause::Closed);
    debug!(session_id = %session_id, "Session event loop terminated");
}

async fn run_event_loop(
    bridge: &Bridge,
    session_id: SessionId,
    ws_stream: WebSocketStream<TcpStream>,
    mut outlet: SessionOutlet,
) {
    let (mut ws_write, mut ws_read) = ws_stream.split();

    loop {
        tokio::select! {
            // Incoming frames from the client
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_incoming(bridge, session_id, text.as_str())
                            && let Err(e) = send_frame(&mut ws_write, &reply).await
                        {
                            warn!(session_id = %session_id, error = %e, "Failed to send reply");
                            break;
                        }
                    }

                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        bridge.touch(session_id);
                    }

                    Some(Ok(Message::Close(frame))) => {
                        debug!(session_id = %session_id, ?frame, "WebSocket closed by client");
                        break;
                    }

                    Some(Ok(Message::Binary(_))) => {
                        warn!(session_id = %session_id, "Ignoring binary frame");
                    }

                    Some(Ok(Message::Frame(_))) => {}

                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "WebSocket error");
                        break;
                    }

                    None => {
                        debug!(session_id = %session_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            // Frames queued by the bridge
            outbound = outlet.outbound.recv() => {
                let Some(message) = outbound else {
                    break;
                };
                if let Err(e) = ws_write.send(message).await {
                    warn!(session_id = %session_id, error = %e, "Failed to write frame");
                    break;
                }
            }

            // Eviction or shutdown
            () = outlet.closer.notified() => {
                let frame = CloseFrame {
                    code: CloseCode::Away,
                    reason: "bridge closing session".into(),
                };
                let _ = ws_write.send(Message::Close(Some(frame))).await;
                let _ = ws_write.close().await;
                debug!(session_id = %session_id, "Session closed by bridge");
                break;
            }
        }
    }
}

/// Handles one text frame; returns a reply if one is due.
///
/// Malformed frames are logged and dropped without touching the registry.
fn handle_incoming(bridge: &Bridge, session_id: SessionId, text: &str) -> Option<ServerFrame> {
    match ClientFrame::parse(text) {
        Ok(ClientFrame::Ping { timestamp }) => {
            bridge.touch(session_id);
            trace!(session_id = %session_id, timestamp, "Ping received");
            Some(ServerFrame::pong())
        }
        Ok(ClientFrame::Unknown) => {
            bridge.touch(session_id);
            debug!(session_id = %session_id, text = %text, "Unhandled client frame");
            None
        }
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Dropping malformed frame");
            None
        }
    }
}

async fn send_frame(ws_write: &mut WsSink, frame: &ServerFrame) -> Result<()> {
    ws_write.send(frame.to_message()?).await?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
