//! `osc-fanout` command line.
//!
//! ```text
//! osc-fanout bridge --osc-port 3333 --ws-port 8080
//! osc-fanout listen --url ws://localhost:8080 --voices 0,1
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use osc_fanout::{
    BridgeConfig, BridgeServer, BridgeStatus, ClientConfig, ClientEvent, ClientSession, LogBackend,
    Result,
};

// ============================================================================
// Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "osc-fanout", version, about = "Round-robin OSC to WebSocket bridge")]
struct Cli {
    /// Verbose logging.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the OSC to WebSocket bridge.
    Bridge(BridgeArgs),
    /// Run a headless client that logs triggers.
    Listen(ListenArgs),
}

#[derive(Args, Debug)]
struct BridgeArgs {
    /// UDP port for incoming OSC.
    #[arg(long, default_value_t = osc_fanout::config::DEFAULT_OSC_PORT)]
    osc_port: u16,

    /// TCP port for WebSocket clients.
    #[arg(long, default_value_t = osc_fanout::config::DEFAULT_WS_PORT)]
    ws_port: u16,

    /// Address to bind both sockets to.
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Seconds without activity before a session is evicted.
    #[arg(long, default_value_t = 60)]
    stale_timeout_secs: u64,

    /// Seconds between liveness sweeps.
    #[arg(long, default_value_t = 30)]
    sweep_interval_secs: u64,

    /// Log a status snapshot this often, in seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    status_interval_secs: u64,
}

#[derive(Args, Debug)]
struct ListenArgs {
    /// Bridge WebSocket URL.
    #[arg(long, default_value = "ws://localhost:8080")]
    url: String,

    /// Only play these `/plaits/state` voices.
    #[arg(long, value_delimiter = ',')]
    voices: Option<Vec<i64>>,

    /// Reconnection attempts before giving up.
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Command::Bridge(args) => run_bridge(args).await,
        Command::Listen(args) => run_listen(args).await,
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("osc_fanout=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("osc_fanout=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ============================================================================
// Commands
// ============================================================================

async fn run_bridge(args: BridgeArgs) -> Result<()> {
    let config = BridgeConfig::new()
        .with_host(args.host)
        .with_osc_port(args.osc_port)
        .with_ws_port(args.ws_port)
        .with_stale_timeout(Duration::from_secs(args.stale_timeout_secs))
        .with_sweep_interval(Duration::from_secs(args.sweep_interval_secs));

    let server = BridgeServer::bind(config).await?;
    info!(
        osc = %server.osc_addr(),
        ws = %server.ws_url(),
        "Bridge ready, press Ctrl+C to stop"
    );

    let mut status_tick = (args.status_interval_secs > 0).then(|| {
        let period = Duration::from_secs(args.status_interval_secs);
        tokio::time::interval_at(tokio::time::Instant::now() + period, period)
    });
    let mut status_signal = StatusSignal::new()?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }

            () = status_signal.recv() => info!(status = %status_json(&server.status()), "Bridge status"),

            () = tick(status_tick.as_mut()) => {
                debug!(status = %status_json(&server.status()), "Bridge status");
            }
        }
    }

    server.shutdown().await;
    Ok(())
}

/// Waits for the next tick, or forever when periodic status is disabled.
async fn tick(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn status_json(status: &BridgeStatus) -> String {
    serde_json::to_string(status).unwrap_or_else(|e| format!("unserializable status: {e}"))
}

/// On-demand status dumps via `SIGUSR1`.
#[cfg(unix)]
struct StatusSignal(tokio::signal::unix::Signal);

#[cfg(unix)]
impl StatusSignal {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self(signal(SignalKind::user_defined1())?))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct StatusSignal;

#[cfg(not(unix))]
impl StatusSignal {
    #[allow(clippy::unnecessary_wraps)]
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

async fn run_listen(args: ListenArgs) -> Result<()> {
    let mut config = ClientConfig::new(args.url).with_max_attempts(args.max_attempts);
    if let Some(voices) = args.voices {
        config = config.with_voice_filter(voices);
    }

    let (handle, mut events) = ClientSession::spawn(config, Arc::new(LogBackend::new()))?;

    // No user gesture to wait for in a headless listener.
    handle.unlock().await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::TerminalFailure { attempts }) => {
                    error!(attempts, "Bridge unreachable, giving up");
                    return Err(osc_fanout::Error::reconnect_exhausted(attempts));
                }
                Some(ClientEvent::AudioPrompt { reason }) => {
                    warn!(reason = %reason, "Playback stopped, resuming");
                    if let Err(e) = handle.unlock().await {
                        warn!(error = %e, "Resume failed");
                    }
                }
                Some(event) => info!(?event, "Client event"),
                None => break,
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
