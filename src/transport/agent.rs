//! Upstream connection to the in-container terminal agent.
//!
//! The agent listens on the session's loopback host port and speaks the
//! `tty` WebSocket subprotocol. The very first broker frame on a fresh
//! connection is the bare sizing JSON; everything afterwards is
//! command-prefixed.

use crate::env;
use crate::transport::{Result, TransportError, size_json};
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

/// Upstream socket type.
pub type AgentSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a socket to the agent on `host_port` and perform the sizing
/// handshake.
///
/// # Errors
///
/// Returns [`TransportError::ConnectTimeout`] when the agent does not accept
/// within the connect timeout, or the underlying socket error otherwise.
pub async fn connect_agent(host_port: u16, columns: u16, rows: u16) -> Result<AgentSocket> {
    let url = format!("ws://127.0.0.1:{host_port}/ws");
    debug!("Connecting to agent at {}", url);

    let mut request = url
        .into_client_request()
        .map_err(TransportError::Upstream)?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("tty"));

    let (mut socket, _response) =
        tokio::time::timeout(env::AGENT_CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| TransportError::ConnectTimeout)??;

    // Legacy handshake: the first frame is the sizing JSON without a command
    // byte.
    socket
        .send(Message::Text(size_json(columns, rows).into()))
        .await?;

    debug!("Agent connection on port {} established", host_port);
    Ok(socket)
}
