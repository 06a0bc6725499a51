//! JSON frames exchanged between bridge and clients.
//!
//! Every frame is a JSON object tagged by `type`.
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | `welcome` | Bridge → Client | Assigned identity, sent once after registration |
//! | `osc` | Bridge → Client | One distributed OSC message |
//! | `clientCount` | Bridge → Client | Membership changed |
//! | `pong` | Bridge → Client | Reply to `ping` |
//! | `ping` | Client → Bridge | Keepalive |

// ============================================================================
// Imports
// ============================================================================

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Value, from_str, to_string};
use tokio_tungstenite::tungstenite::Message;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Informational text carried by the `welcome` frame.
pub const WELCOME_MESSAGE: &str = "Connected to OSC WebSocket Bridge";

// ============================================================================
// ServerFrame
// ============================================================================

/// A frame sent from the bridge to a client.
///
/// # Format
///
/// ```json
/// { "type": "osc", "address": "/onset", "args": [...], "timestamp": 1700000000000, "clientId": "client_1_ab12cd34e" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    /// Sent once, immediately after registration.
    #[serde(rename_all = "camelCase")]
    Welcome {
        /// Identity assigned by the bridge.
        client_id: String,
        /// Live sessions including this one.
        total_clients: usize,
        /// Human-readable greeting.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// One distributed OSC message.
    #[serde(rename_all = "camelCase")]
    Osc {
        /// OSC address path.
        address: String,
        /// Arguments, either raw values or `{"value": ...}` wrappers.
        args: Vec<Value>,
        /// Wall-clock milliseconds at send time.
        timestamp: u64,
        /// Session the message was routed to.
        client_id: String,
    },

    /// Registry membership changed.
    ClientCount {
        /// Live sessions.
        count: usize,
        /// Wall-clock milliseconds at send time.
        timestamp: u64,
    },

    /// Reply to a client `ping`.
    Pong {
        /// Wall-clock milliseconds at send time.
        timestamp: u64,
    },
}

impl ServerFrame {
    /// Creates a `welcome` frame.
    #[must_use]
    pub fn welcome(client_id: impl Into<String>, total_clients: usize) -> Self {
        Self::Welcome {
            client_id: client_id.into(),
            total_clients,
            message: Some(WELCOME_MESSAGE.to_string()),
        }
    }

    /// Creates a `clientCount` frame stamped with the current time.
    #[must_use]
    pub fn client_count(count: usize) -> Self {
        Self::ClientCount {
            count,
            timestamp: now_millis(),
        }
    }

    /// Creates a `pong` frame stamped with the current time.
    #[must_use]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: now_millis(),
        }
    }

    /// Returns the `type` tag of this frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Osc { .. } => "osc",
            Self::ClientCount { .. } => "clientCount",
            Self::Pong { .. } => "pong",
        }
    }

    /// Serializes into a WebSocket text message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::Text(to_string(self)?.into()))
    }

    /// Parses a frame received from the bridge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if `text` is not a known frame.
    pub fn parse(text: &str) -> Result<Self> {
        from_str(text).map_err(|e| Error::malformed_frame(e.to_string()))
    }
}

// ============================================================================
// ClientFrame
// ============================================================================

/// A frame sent from a client to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Keepalive; refreshes the session's activity and elicits a `pong`.
    Ping {
        /// Wall-clock milliseconds at send time.
        #[serde(default)]
        timestamp: u64,
    },

    /// Any well-formed frame with a type the bridge does not act on.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// Creates a `ping` frame stamped with the current time.
    #[must_use]
    pub fn ping() -> Self {
        Self::Ping {
            timestamp: now_millis(),
        }
    }

    /// Serializes into a WebSocket text message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::Text(to_string(self)?.into()))
    }

    /// Parses a frame received from a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if `text` is not a JSON frame.
    pub fn parse(text: &str) -> Result<Self> {
        from_str(text).map_err(|e| Error::malformed_frame(e.to_string()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Wall-clock milliseconds since the Unix epoch, for frame timestamps.
///
/// Timestamps are informational; nothing orders on them.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_welcome_wire_format() {
        let frame = ServerFrame::welcome("client_1_abc", 3);
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["type"], "welcome");
        assert_eq!(value["clientId"], "client_1_abc");
        assert_eq!(value["totalClients"], 3);
        assert_eq!(value["message"], WELCOME_MESSAGE);
    }

    #[test]
    fn test_osc_wire_format() {
        let frame = ServerFrame::Osc {
            address: "/onset".into(),
            args: vec![json!(440.0), json!({"type": "f", "value": 0.5})],
            timestamp: 42,
            client_id: "client_2_abc".into(),
        };
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["type"], "osc");
        assert_eq!(value["address"], "/onset");
        assert_eq!(value["args"][1]["value"], 0.5);
        assert_eq!(value["timestamp"], 42);
        assert_eq!(value["clientId"], "client_2_abc");
    }

    #[test]
    fn test_client_count_wire_format() {
        let value = serde_json::to_value(ServerFrame::client_count(4)).unwrap();
        assert_eq!(value["type"], "clientCount");
        assert_eq!(value["count"], 4);
        assert!(value["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_parse_welcome_without_message() {
        let frame =
            ServerFrame::parse(r#"{"type":"welcome","clientId":"c1","totalClients":1}"#).unwrap();
        assert_eq!(
            frame,
            ServerFrame::Welcome {
                client_id: "c1".into(),
                total_clients: 1,
                message: None,
            }
        );
    }

    #[test]
    fn test_parse_unknown_server_frame_is_malformed() {
        let err = ServerFrame::parse(r#"{"type":"mystery"}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame { .. }));
    }

    #[test]
    fn test_parse_ping() {
        let frame = ClientFrame::parse(r#"{"type":"ping","timestamp":123}"#).unwrap();
        assert_eq!(frame, ClientFrame::Ping { timestamp: 123 });
    }

    #[test]
    fn test_parse_unknown_client_frame() {
        let frame = ClientFrame::parse(r#"{"type":"hello"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Unknown);
    }

    #[test]
    fn test_parse_garbage_client_frame() {
        assert!(ClientFrame::parse("not json").is_err());
        assert!(ClientFrame::parse(r#"{"no_type":true}"#).is_err());
    }

    #[test]
    fn test_frame_kind() {
        assert_eq!(ServerFrame::pong().kind(), "pong");
        assert_eq!(ServerFrame::client_count(0).kind(), "clientCount");
    }
}
