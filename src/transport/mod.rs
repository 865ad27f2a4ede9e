//! Terminal transports.
//!
//! Two carriers bridge the browser to the in-container agent: a full-duplex
//! socket tunnel and an HTTP long-polling channel with a server-side replay
//! buffer. Both speak the agent's command-prefixed binary protocol upstream
//! and hold a session reference for their lifetime.
//!
//! - [`agent`]: upstream socket to the agent, initial sizing handshake
//! - [`socket`]: bidirectional tunnel for WebSocket-capable clients
//! - [`polling`]: replay-buffered long polling for everything else

pub mod agent;
pub mod polling;
pub mod socket;

pub use agent::{AgentSocket, connect_agent};
pub use polling::{PollOutcome, PollingStation};

use crate::session::SessionError;

/// Agent protocol commands, agent to broker.
pub const CMD_OUTPUT: u8 = b'0';
pub const CMD_TITLE: u8 = b'1';
pub const CMD_PREFS: u8 = b'2';

/// Agent protocol commands, broker to agent.
pub const CMD_INPUT: u8 = b'0';
pub const CMD_RESIZE: u8 = b'1';

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The polling transport is gone; the client must reconnect.
    #[error("transport gone")]
    Gone,

    /// Upstream agent socket failure
    #[error("agent socket error: {0}")]
    Upstream(#[from] tokio_tungstenite::tungstenite::Error),

    /// Timed out connecting to the agent
    #[error("agent connect timed out")]
    ConnectTimeout,

    /// Session layer refusal
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Build a broker-to-agent input frame: command byte `'0'` plus the raw
/// terminal input bytes.
pub fn input_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + body.len());
    frame.push(CMD_INPUT);
    frame.extend_from_slice(body);
    frame
}

/// Build a broker-to-agent resize frame: command byte `'1'` plus the sizing
/// JSON.
pub fn resize_frame(columns: u16, rows: u16) -> Vec<u8> {
    let mut frame = vec![CMD_RESIZE];
    frame.extend_from_slice(size_json(columns, rows).as_bytes());
    frame
}

/// Sizing JSON sent as the very first upstream frame with no command byte
/// (legacy quirk of the agent).
pub fn size_json(columns: u16, rows: u16) -> String {
    serde_json::json!({ "columns": columns, "rows": rows }).to_string()
}
