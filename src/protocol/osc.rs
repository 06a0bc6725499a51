//! OSC datagram decoding and argument normalization.
//!
//! The bridge receives OSC over UDP, flattens bundles, and forwards each
//! message with its arguments in the typed wire form
//! `{"type": "<tag>", "value": <json>}`. Clients accept both that form and
//! bare values, so [`normalize_arg`] is the single place that unwraps them.

// ============================================================================
// Imports
// ============================================================================

use rosc::{OscPacket, OscType};
use serde_json::{Map, Value, json};

use crate::error::Result;

// ============================================================================
// OscMessage
// ============================================================================

/// One decoded OSC message, ready for distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    /// OSC address path, e.g. `/plaits/state`.
    pub address: String,
    /// Arguments in typed wire form.
    pub args: Vec<Value>,
}

impl OscMessage {
    /// Creates a message from an address and wire-form arguments.
    #[inline]
    #[must_use]
    pub fn new(address: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }
}

impl From<rosc::OscMessage> for OscMessage {
    fn from(msg: rosc::OscMessage) -> Self {
        Self {
            args: msg.args.iter().map(typed_arg).collect(),
            address: msg.addr,
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes one UDP datagram into its messages.
///
/// Bundles are flattened depth-first, preserving the order of their content.
///
/// # Errors
///
/// Returns [`Error::Osc`](crate::Error::Osc) if the datagram is not valid OSC.
pub fn decode_datagram(buf: &[u8]) -> Result<Vec<OscMessage>> {
    let (_, packet) = rosc::decoder::decode_udp(buf)?;
    let mut out = Vec::new();
    flatten(packet, &mut out);
    Ok(out)
}

fn flatten(packet: OscPacket, out: &mut Vec<OscMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(msg.into()),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

/// Converts one OSC argument into `{"type": tag, "value": v}`.
///
/// Every argument keeps its position, so key/value payloads stay aligned.
fn typed_arg(arg: &OscType) -> Value {
    let (tag, value) = match arg {
        OscType::Int(v) => ("i", json!(v)),
        OscType::Long(v) => ("h", json!(v)),
        OscType::Float(v) => ("f", json!(f64::from(*v))),
        OscType::Double(v) => ("d", json!(v)),
        OscType::String(v) => ("s", json!(v)),
        OscType::Char(v) => ("c", json!(v.to_string())),
        OscType::Bool(true) => ("T", json!(true)),
        OscType::Bool(false) => ("F", json!(false)),
        OscType::Nil => ("N", Value::Null),
        OscType::Inf => ("I", Value::Null),
        OscType::Blob(bytes) => ("b", json!(bytes)),
        OscType::Time(time) => ("t", json!({ "raw": [time.seconds, time.fractional] })),
        OscType::Midi(midi) => ("m", json!([midi.port, midi.status, midi.data1, midi.data2])),
        OscType::Color(color) => (
            "r",
            json!({ "r": color.red, "g": color.green, "b": color.blue, "a": color.alpha }),
        ),
        OscType::Array(array) => ("[", Value::Array(array.content.iter().map(typed_arg).collect())),
    };
    json!({ "type": tag, "value": value })
}

// ============================================================================
// Normalization
// ============================================================================

/// Unwraps a `{"value": ...}` wrapper, returning bare values unchanged.
#[must_use]
pub fn normalize_arg(arg: &Value) -> Value {
    match arg {
        Value::Object(map) => unwrap_value(map).unwrap_or_else(|| arg.clone()),
        other => other.clone(),
    }
}

/// Normalizes every argument with [`normalize_arg`].
#[must_use]
pub fn normalize_args(args: &[Value]) -> Vec<Value> {
    args.iter().map(normalize_arg).collect()
}

fn unwrap_value(map: &Map<String, Value>) -> Option<Value> {
    map.get("value").cloned()
}

// ============================================================================
// Tests
// ============================================================================
