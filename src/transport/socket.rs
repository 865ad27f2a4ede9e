//! Full-duplex socket tunnel.
//!
//! Bridges one client WebSocket to the agent's socket for the lifetime of
//! either endpoint. Frames pass through verbatim in both directions; the
//! broker buffers nothing beyond the frame in flight, so this transport does
//! not survive client disconnects. The polling transport exists for that.

use crate::env;
use crate::session::SessionRef;
use crate::transport::connect_agent;
use axum::extract::ws::{Message as ClientMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_tungstenite::tungstenite::Message as AgentMessage;
use tracing::{debug, info};

use super::agent::AgentSocket;

/// Run the tunnel until either side closes.
///
/// The session reference is held by the caller-supplied guard and released
/// when this function returns on any path.
pub async fn run_bridge(client: WebSocket, session: SessionRef, columns: u16, rows: u16) {
    let sid_short = session.id.get(..env::CONTAINER_NAME_ID_LEN).unwrap_or("?");
    info!("Socket transport attaching to session {}", sid_short);

    let agent = match connect_agent(session.host_port, columns, rows).await {
        Ok(agent) => agent,
        Err(e) => {
            debug!("Agent connect for session {} failed: {}", sid_short, e);
            let mut client = client;
            let _ = client
                .send(ClientMessage::Close(Some(axum::extract::ws::CloseFrame {
                    code: 1011,
                    reason: "agent unreachable".into(),
                })))
                .await;
            return;
        }
    };

    session.touch();

    let (client_tx, client_rx) = client.split();
    let (agent_tx, agent_rx) = agent.split();

    // Missed-pong flag shared between the uplink (which pings) and the
    // downlink (which sees the pongs).
    let awaiting_pong = Arc::new(AtomicBool::new(false));

    let mut uplink = tokio::spawn(forward_client_to_agent(
        client_rx,
        agent_tx,
        awaiting_pong.clone(),
    ));
    let mut downlink = tokio::spawn(forward_agent_to_client(agent_rx, client_tx, awaiting_pong));

    // Close or error in either direction terminates both; the surviving
    // direction is cancelled.
    tokio::select! {
        _ = &mut uplink => downlink.abort(),
        _ = &mut downlink => uplink.abort(),
    }

    info!("Socket transport for session {} closed", sid_short);
    drop(session);
}

/// Relay client frames upstream and drive the keepalive: a ping every
/// interval, and a missed pong by the next tick closes the tunnel.
async fn forward_client_to_agent(
    mut client_rx: SplitStream<WebSocket>,
    mut agent_tx: SplitSink<AgentSocket, AgentMessage>,
    awaiting_pong: Arc<AtomicBool>,
) {
    let mut keepalive = tokio::time::interval(env::AGENT_PING_INTERVAL);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Consume the immediate first tick so the first ping goes out one full
    // interval after attach.
    keepalive.tick().await;

    loop {
        tokio::select! {
            frame = client_rx.next() => {
                let Some(Ok(frame)) = frame else { break };
                let upstream = match frame {
                    ClientMessage::Binary(data) => AgentMessage::Binary(data),
                    ClientMessage::Text(text) => AgentMessage::Text(text.as_str().into()),
                    ClientMessage::Close(_) => break,
                    // Axum answers client pings itself.
                    ClientMessage::Ping(_) | ClientMessage::Pong(_) => continue,
                };
                if agent_tx.send(upstream).await.is_err() {
                    break;
                }
            }
            _ = keepalive.tick() => {
                if awaiting_pong.swap(true, Ordering::SeqCst) {
                    debug!("Agent missed pong deadline; closing tunnel");
                    break;
                }
                if agent_tx.send(AgentMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = agent_tx.send(AgentMessage::Close(None)).await;
}

/// Relay agent frames to the client in production order.
async fn forward_agent_to_client(
    mut agent_rx: SplitStream<AgentSocket>,
    mut client_tx: SplitSink<WebSocket, ClientMessage>,
    awaiting_pong: Arc<AtomicBool>,
) {
    while let Some(frame) = agent_rx.next().await {
        let downstream = match frame {
            Ok(AgentMessage::Binary(data)) => ClientMessage::Binary(data),
            Ok(AgentMessage::Text(text)) => ClientMessage::Text(text.as_str().into()),
            Ok(AgentMessage::Pong(_)) => {
                awaiting_pong.store(false, Ordering::SeqCst);
                continue;
            }
            // The library answers agent pings on flush.
            Ok(AgentMessage::Ping(_)) => continue,
            Ok(AgentMessage::Close(_)) | Ok(AgentMessage::Frame(_)) | Err(_) => break,
        };
        if client_tx.send(downstream).await.is_err() {
            break;
        }
    }

    let _ = client_tx.send(ClientMessage::Close(None)).await;
}
