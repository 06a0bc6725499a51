//! Trigger parameters and inbound OSC classification.
//!
//! The sound module speaks a handful of addresses:
//!
//! | Address | Arguments | Result |
//! |---------|-----------|--------|
//! | `/plaits/state` | `voice, key, value, key, value, ...` | [`InboundOsc::State`] |
//! | `/onset` | `freq, amp, dur` | [`InboundOsc::Onset`] |
//! | anything else | passed through | [`InboundOsc::Generic`] |

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::osc::normalize_args;

// ============================================================================
// Constants
// ============================================================================

/// Address carrying per-voice synthesis state.
pub const STATE_ADDRESS: &str = "/plaits/state";

/// Address carrying an onset `[freq, amp, dur]` triple.
pub const ONSET_ADDRESS: &str = "/onset";

/// Key under which the voice index is stored in [`TriggerParams`].
pub const VOICE_KEY: &str = "voice";

// ============================================================================
// ParamValue
// ============================================================================

/// A single trigger parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Numeric value.
    Number(f64),
    /// Text value, e.g. an engine name.
    Text(String),
}

impl ParamValue {
    /// Converts a normalized JSON value.
    ///
    /// Booleans become `1.0`/`0.0`; nulls, arrays, and objects have no
    /// parameter form.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Bool(b) => Some(Self::Number(if *b { 1.0 } else { 0.0 })),
            _ => None,
        }
    }

    /// Returns the numeric value, if any.
    #[inline]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    /// Returns the value as an integer when it is a whole number.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64()
            .filter(|n| n.fract() == 0.0)
            .map(|n| n as i64)
    }
}

/// Flat key → value mapping handed to the playback backend.
pub type TriggerParams = BTreeMap<String, ParamValue>;

/// Returns the voice index of a parameter set, if present and integral.
#[must_use]
pub fn voice_of(params: &TriggerParams) -> Option<i64> {
    params.get(VOICE_KEY).and_then(ParamValue::as_i64)
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses `voice, key, value, key, value, ...` into a parameter map.
///
/// Arguments may be raw values or `{"value": ...}` wrappers. Pairs whose key
/// is not a non-empty string, or whose value is missing, are skipped.
#[must_use]
pub fn parse_key_value_args(args: &[Value]) -> TriggerParams {
    let raw = normalize_args(args);
    let mut params = TriggerParams::new();

    for pair in raw.get(1..).unwrap_or_default().chunks(2) {
        let [key, value] = pair else { continue };
        let Some(key) = key.as_str().filter(|k| !k.is_empty()) else {
            continue;
        };
        if let Some(value) = ParamValue::from_json(value) {
            params.insert(key.to_string(), value);
        }
    }

    if let Some(voice) = raw.first().and_then(ParamValue::from_json) {
        params.insert(VOICE_KEY.to_string(), voice);
    }

    params
}

// ============================================================================
// InboundOsc
// ============================================================================

/// An `osc` frame interpreted by address.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOsc {
    /// Per-voice synthesis state; becomes a playback trigger.
    State(TriggerParams),

    /// Onset marker.
    Onset {
        /// Frequency in Hz.
        freq: f64,
        /// Amplitude.
        amp: f64,
        /// Duration in seconds.
        dur: f64,
    },

    /// Any other address, arguments normalized.
    Generic {
        /// OSC address path.
        address: String,
        /// Normalized arguments.
        args: Vec<Value>,
    },
}

impl InboundOsc {
    /// Interprets an address and its arguments.
    #[must_use]
    pub fn classify(address: &str, args: &[Value]) -> Self {
        match address {
            STATE_ADDRESS => Self::State(parse_key_value_args(args)),
            ONSET_ADDRESS => Self::onset(args).unwrap_or_else(|| Self::Generic {
                address: address.to_string(),
                args: normalize_args(args),
            }),
            _ => Self::Generic {
                address: address.to_string(),
                args: normalize_args(args),
            },
        }
    }

    fn onset(args: &[Value]) -> Option<Self> {
        let raw = normalize_args(args);
        let [freq, amp, dur] = raw.get(..3)? else {
            return None;
        };
        Some(Self::Onset {
            freq: freq.as_f64()?,
            amp: amp.as_f64()?,
            dur: dur.as_f64()?,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
