//! Wire protocol and OSC message types.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | OSC datagram | Sound module → Bridge | Real-time control data over UDP |
//! | `ServerFrame` | Bridge → Client | `welcome`, `osc`, `clientCount`, `pong` |
//! | `ClientFrame` | Client → Bridge | `ping` keepalive |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | JSON frames tagged by `type` |
//! | `osc` | OSC datagram decoding and argument normalization |
//! | `params` | Trigger parameter parsing by address |

// ============================================================================
// Submodules
// ============================================================================

/// JSON frames exchanged over the WebSocket.
pub mod frame;

/// OSC decoding and argument normalization.
pub mod osc;

/// Trigger parameters and address classification.
pub mod params;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{ClientFrame, ServerFrame, now_millis};
pub use osc::{OscMessage, decode_datagram, normalize_arg, normalize_args};
pub use params::{InboundOsc, ParamValue, TriggerParams, parse_key_value_args, voice_of};
