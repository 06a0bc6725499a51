//! Bridge and client configuration.
//!
//! Provides type-safe configuration with fluent `with_*` builders.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use osc_fanout::{BridgeConfig, ClientConfig};
//!
//! let bridge = BridgeConfig::new()
//!     .with_osc_port(3333)
//!     .with_ws_port(8080)
//!     .with_stale_timeout(Duration::from_secs(60));
//!
//! let client = ClientConfig::new("ws://127.0.0.1:8080")
//!     .with_voice_filter([0, 1])
//!     .with_max_attempts(5);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default bind address for both listeners (all interfaces).
const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Default UDP port for OSC input.
pub const DEFAULT_OSC_PORT: u16 = 3333;

/// Default TCP port for WebSocket clients.
pub const DEFAULT_WS_PORT: u16 = 8080;

// ============================================================================
// BridgeConfig
// ============================================================================

/// Configuration for the distribution bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// UDP address receiving OSC datagrams.
    pub osc_addr: SocketAddr,

    /// TCP address accepting WebSocket clients.
    pub ws_addr: SocketAddr,

    /// How often the liveness sweeper runs.
    pub sweep_interval: Duration,

    /// Inactivity after which a session is evicted.
    pub stale_timeout: Duration,

    /// Frames buffered per session before it counts as unwritable.
    pub outbound_capacity: usize,

    /// Time a new connection has to finish the WebSocket handshake.
    pub handshake_timeout: Duration,

    /// How long shutdown waits for sessions to send their close frames.
    pub shutdown_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            osc_addr: SocketAddr::new(DEFAULT_BIND_IP, DEFAULT_OSC_PORT),
            ws_addr: SocketAddr::new(DEFAULT_BIND_IP, DEFAULT_WS_PORT),
            sweep_interval: Duration::from_secs(30),
            stale_timeout: Duration::from_secs(60),
            outbound_capacity: 64,
            handshake_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(2),
        }
    }

    /// Creates a configuration bound to loopback on random ports.
    ///
    /// Intended for tests and local tooling.
    #[must_use]
    pub fn loopback() -> Self {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            osc_addr: SocketAddr::new(ip, 0),
            ws_addr: SocketAddr::new(ip, 0),
            ..Self::new()
        }
    }

    /// Sets the IP both listeners bind to.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, ip: IpAddr) -> Self {
        self.osc_addr.set_ip(ip);
        self.ws_addr.set_ip(ip);
        self
    }

    /// Sets the OSC UDP port.
    #[inline]
    #[must_use]
    pub fn with_osc_port(mut self, port: u16) -> Self {
        self.osc_addr.set_port(port);
        self
    }

    /// Sets the WebSocket TCP port.
    #[inline]
    #[must_use]
    pub fn with_ws_port(mut self, port: u16) -> Self {
        self.ws_addr.set_port(port);
        self
    }

    /// Sets the liveness sweep interval.
    #[inline]
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the inactivity threshold for eviction.
    #[inline]
    #[must_use]
    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    /// Sets the per-session outbound buffer size.
    #[inline]
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Sets the WebSocket handshake deadline.
    #[inline]
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets how long shutdown waits for sessions to close.
    #[inline]
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Checks the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on zero intervals or a zero-sized buffer.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(Error::config("sweep_interval must be greater than zero"));
        }
        if self.stale_timeout.is_zero() {
            return Err(Error::config("stale_timeout must be greater than zero"));
        }
        if self.outbound_capacity == 0 {
            return Err(Error::config("outbound_capacity must be at least 1"));
        }
        if self.handshake_timeout.is_zero() {
            return Err(Error::config("handshake_timeout must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Exponential backoff for client reconnection.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,

    /// Attempts scheduled before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 5)
    }
}

impl ReconnectPolicy {
    /// Creates a policy.
    #[inline]
    #[must_use]
    pub const fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    /// Returns the delay for a 1-based attempt number.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

// ============================================================================
// ClientConfig
// ============================================================================

/// Configuration for a bridge client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Bridge WebSocket URL (`ws://` or `wss://`).
    pub url: String,

    /// Reconnection backoff.
    pub reconnect: ReconnectPolicy,

    /// Period between keepalive pings.
    pub heartbeat_interval: Duration,

    /// Limit on a single connection attempt.
    pub connect_timeout: Duration,

    /// Minimum spacing between health checks.
    pub health_throttle: Duration,

    /// Pending triggers kept while not ready; the oldest is dropped beyond this.
    pub pending_capacity: usize,

    /// Pending count above which health checks log a diagnostic note.
    pub pending_log_threshold: usize,

    /// Voices accepted from `/plaits/state`; `None` accepts all.
    pub voice_filter: Option<Vec<i64>>,
}

impl ClientConfig {
    /// Creates a configuration for `url` with default settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            health_throttle: Duration::from_secs(2),
            pending_capacity: 256,
            pending_log_threshold: 8,
            voice_filter: None,
        }
    }

    /// Sets the reconnection policy.
    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Sets the reconnection attempt ceiling.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect.max_attempts = attempts;
        self
    }

    /// Sets the keepalive period.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the connection attempt timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the minimum spacing between health checks.
    #[inline]
    #[must_use]
    pub fn with_health_throttle(mut self, throttle: Duration) -> Self {
        self.health_throttle = throttle;
        self
    }

    /// Sets the pending trigger bound.
    #[inline]
    #[must_use]
    pub fn with_pending_capacity(mut self, capacity: usize) -> Self {
        self.pending_capacity = capacity;
        self
    }

    /// Restricts `/plaits/state` processing to the given voices.
    #[must_use]
    pub fn with_voice_filter(mut self, voices: impl IntoIterator<Item = i64>) -> Self {
        self.voice_filter = Some(voices.into_iter().collect());
        self
    }

    /// Returns `true` if `voice` passes the voice filter.
    #[must_use]
    pub fn accepts_voice(&self, voice: Option<i64>) -> bool {
        match (&self.voice_filter, voice) {
            (None, _) => true,
            (Some(voices), Some(voice)) => voices.contains(&voice),
            (Some(_), None) => false,
        }
    }

    /// Checks the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL is not `ws`/`wss` or a duration or
    /// capacity is zero.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::config(format!("invalid bridge url {:?}: {e}", self.url)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "bridge url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        if self.reconnect.base_delay.is_zero() {
            return Err(Error::config("reconnect base_delay must be greater than zero"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::config("heartbeat_interval must be greater than zero"));
        }
        if self.pending_capacity == 0 {
            return Err(Error::config("pending_capacity must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
