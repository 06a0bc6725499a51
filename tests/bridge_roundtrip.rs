//! End-to-end tests over loopback UDP and WebSocket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures_util::StreamExt;
use rosc::{OscBundle, OscMessage as RoscMessage, OscPacket, OscTime, OscType, encoder};
use tokio::net::{TcpStream, UdpSocket};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use osc_fanout::client::{ChannelBackend, ClientEvent};
use osc_fanout::protocol::{ParamValue, normalize_args};
use osc_fanout::{BridgeConfig, BridgeServer, ClientConfig, ClientSession, ServerFrame};

// ============================================================================
// Helpers
// ============================================================================

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start_bridge() -> Result<BridgeServer> {
    Ok(BridgeServer::bind(BridgeConfig::loopback()).await?)
}

async fn connect(server: &BridgeServer) -> Result<(Ws, String)> {
    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url()).await?;
    match next_frame(&mut ws).await? {
        ServerFrame::Welcome { client_id, .. } => Ok((ws, client_id)),
        other => bail!("expected welcome, got {other:?}"),
    }
}

async fn next_frame(ws: &mut Ws) -> Result<ServerFrame> {
    loop {
        let message = tokio::time::timeout(WAIT, ws.next())
            .await
            .context("frame in time")?
            .context("stream open")??;
        if let Message::Text(text) = message {
            return Ok(ServerFrame::parse(text.as_str())?);
        }
    }
}

/// Skips membership frames and returns the next `osc` frame.
async fn next_osc(ws: &mut Ws) -> Result<(String, Vec<serde_json::Value>, String)> {
    loop {
        if let ServerFrame::Osc {
            address,
            args,
            client_id,
            ..
        } = next_frame(ws).await?
        {
            return Ok((address, args, client_id));
        }
    }
}

fn message(addr: &str, args: Vec<OscType>) -> OscPacket {
    OscPacket::Message(RoscMessage {
        addr: addr.to_string(),
        args,
    })
}

async fn send_osc(target: SocketAddr, packet: &OscPacket) -> Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let datagram = encoder::encode(packet).map_err(|e| anyhow::anyhow!("encode failed: {e:?}"))?;
    socket.send_to(&datagram, target).await?;
    Ok(())
}

async fn wait_for_clients(server: &BridgeServer, count: usize) -> Result<()> {
    tokio::time::timeout(WAIT, async {
        while server.status().connected_clients != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("client count in time")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_osc_reaches_single_client() -> Result<()> {
    let server = start_bridge().await?;
    let (mut ws, client_id) = connect(&server).await?;
    assert!(client_id.starts_with("client_"));

    send_osc(
        server.osc_addr(),
        &message("/onset", vec![OscType::Float(440.0), OscType::Float(0.5), OscType::Float(0.25)]),
    )
    .await?;

    let (address, args, target) = next_osc(&mut ws).await?;
    assert_eq!(address, "/onset");
    assert_eq!(target, client_id);
    assert_eq!(args[0]["type"], "f");
    assert_eq!(normalize_args(&args), vec![
        serde_json::json!(440.0),
        serde_json::json!(0.5),
        serde_json::json!(0.25)
    ]);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_round_robin_across_clients() -> Result<()> {
    let server = start_bridge().await?;
    let (mut a, id_a) = connect(&server).await?;
    let (mut b, id_b) = connect(&server).await?;
    wait_for_clients(&server, 2).await?;

    for n in 0..4 {
        send_osc(server.osc_addr(), &message("/seq", vec![OscType::Int(n)])).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for expected in [0, 2] {
        let (_, args, target) = next_osc(&mut a).await?;
        assert_eq!(target, id_a);
        assert_eq!(normalize_args(&args), vec![serde_json::json!(expected)]);
    }
    for expected in [1, 3] {
        let (_, args, target) = next_osc(&mut b).await?;
        assert_eq!(target, id_b);
        assert_eq!(normalize_args(&args), vec![serde_json::json!(expected)]);
    }

    assert_eq!(server.status().delivered, 4);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_bundle_is_flattened() -> Result<()> {
    let server = start_bridge().await?;
    let (mut a, _) = connect(&server).await?;
    let (mut b, _) = connect(&server).await?;
    wait_for_clients(&server, 2).await?;

    let bundle = OscPacket::Bundle(OscBundle {
        timetag: OscTime::from((0, 1)),
        content: vec![
            message("/first", vec![OscType::Int(1)]),
            message("/second", vec![OscType::Int(2)]),
        ],
    });
    send_osc(server.osc_addr(), &bundle).await?;

    assert_eq!(next_osc(&mut a).await?.0, "/first");
    assert_eq!(next_osc(&mut b).await?.0, "/second");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_client_count_follows_membership() -> Result<()> {
    let server = start_bridge().await?;
    let (mut a, _) = connect(&server).await?;
    let (b, _) = connect(&server).await?;

    assert!(matches!(next_frame(&mut a).await?, ServerFrame::ClientCount { count: 1, .. }));
    assert!(matches!(next_frame(&mut a).await?, ServerFrame::ClientCount { count: 2, .. }));

    drop(b);
    assert!(matches!(next_frame(&mut a).await?, ServerFrame::ClientCount { count: 1, .. }));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_closes_sessions() -> Result<()> {
    let server = start_bridge().await?;
    let (mut ws, _) = connect(&server).await?;
    wait_for_clients(&server, 1).await?;

    server.shutdown().await;

    loop {
        match tokio::time::timeout(WAIT, ws.next()).await? {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_client_session_plays_after_unlock() -> Result<()> {
    let server = start_bridge().await?;
    let (backend, _control, mut triggers) = ChannelBackend::new();
    let (handle, mut events) =
        ClientSession::spawn(ClientConfig::new(server.ws_url()), Arc::new(backend))?;

    let connected = tokio::time::timeout(WAIT, events.recv()).await?;
    assert_eq!(connected, Some(ClientEvent::Connected { reconnect: false }));
    wait_for_clients(&server, 1).await?;

    let state = message("/plaits/state", vec![
        OscType::Int(1),
        OscType::String("note".to_string()),
        OscType::Float(64.0),
        OscType::String("engine".to_string()),
        OscType::String("fm".to_string()),
    ]);
    send_osc(server.osc_addr(), &state).await?;

    let mut status = handle.subscribe_status();
    tokio::time::timeout(WAIT, status.wait_for(|s| s.pending_count == 1)).await??;

    assert_eq!(handle.unlock().await?, 1);
    let params = tokio::time::timeout(WAIT, triggers.recv())
        .await?
        .context("trigger delivered")?;

    assert_eq!(params.get("note"), Some(&ParamValue::Number(64.0)));
    assert_eq!(params.get("engine"), Some(&ParamValue::Text("fm".to_string())));
    assert_eq!(params.get("voice").and_then(ParamValue::as_i64), Some(1));

    handle.shutdown().await;
    server.shutdown().await;
    Ok(())
}
