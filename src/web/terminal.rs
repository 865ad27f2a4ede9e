//! Terminal transport endpoints: the WebSocket tunnel and the polling
//! channel.

use crate::session::SessionError;
use crate::transport::socket::run_bridge;
use crate::web::AppState;
use crate::web::authz::resolve_principal;
use crate::web::error::ApiError;
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

/// Close codes surfaced to the browser's WebSocket `onclose`.
const CLOSE_UNAUTHORIZED: u16 = 4001;
const CLOSE_FORBIDDEN: u16 = 4003;
const CLOSE_NOT_FOUND: u16 = 4004;
const CLOSE_INTERNAL: u16 = 1011;

#[derive(Debug, Deserialize)]
pub struct SizeParams {
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

/// `GET /terminal/{sid}` — terminal page. Revives the session's container
/// when it died since the last visit. Templates live outside the core.
pub async fn terminal_page(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Html<String>, ApiError> {
    state.manager.get_or_create(&sid).await?;
    Ok(Html(format!(
        "<!doctype html><html><head><title>terminal</title></head>\
         <body data-session=\"{sid}\"><p>terminal attaches via \
         /terminal/{sid}/ws or the polling endpoints</p></body></html>"
    )))
}

/// `GET /terminal/{sid}/ws` — socket transport attach.
///
/// Authentication and ownership run after the upgrade so refusals arrive as
/// close codes rather than opaque handshake failures.
pub async fn ws_attach(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Query(size): Query<SizeParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let principal = resolve_principal(&state, &headers);
    ws.protocols(["tty"])
        .on_upgrade(move |socket| attach_socket(socket, state, sid, size, principal))
}

async fn attach_socket(
    socket: WebSocket,
    state: AppState,
    sid: String,
    size: SizeParams,
    principal: Option<String>,
) {
    let Some(principal) = principal else {
        return close_with(socket, CLOSE_UNAUTHORIZED, "unauthorized").await;
    };

    match state.manager.owners().get(&sid).await {
        Some(owner) if owner == principal => {}
        Some(_) => return close_with(socket, CLOSE_FORBIDDEN, "forbidden").await,
        None => return close_with(socket, CLOSE_NOT_FOUND, "session not found").await,
    }

    let session = match state.manager.acquire_ref(&sid) {
        Ok(session) => session,
        Err(SessionError::NotFound) => {
            return close_with(socket, CLOSE_NOT_FOUND, "session not found").await;
        }
        Err(e) => {
            debug!("Socket attach refused: {}", e);
            return close_with(socket, CLOSE_INTERNAL, "session not ready").await;
        }
    };

    run_bridge(socket, session, size.cols, size.rows).await;
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// `POST /terminal/{sid}/connect?cols=C&rows=R` — attach or resize the
/// polling transport.
pub async fn connect(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Query(size): Query<SizeParams>,
) -> Result<Json<Value>, ApiError> {
    state.polling.connect(&sid, size.cols, size.rows).await?;
    Ok(Json(json!({ "status": "connected" })))
}

#[derive(Debug, Deserialize)]
pub struct PollParams {
    #[serde(default)]
    pub cursor: u64,
    #[serde(default = "default_poll_timeout")]
    pub timeout: u64,
}

fn default_poll_timeout() -> u64 {
    30
}

/// `GET /terminal/{sid}/poll?cursor=K&timeout=T` — long-poll for output.
pub async fn poll(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Query(params): Query<PollParams>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.polling.poll(&sid, params.cursor, params.timeout).await?;
    Ok(Json(json!({
        "cursor": outcome.cursor,
        "data": BASE64.encode(&outcome.data),
        "missed": outcome.missed,
    })))
}

/// `POST /terminal/{sid}/input` — forward the body verbatim to the agent.
pub async fn input(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    state.polling.input(&sid, &body).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// `POST /terminal/{sid}/resize?cols=C&rows=R`
pub async fn resize(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Query(size): Query<SizeParams>,
) -> Result<Json<Value>, ApiError> {
    state.polling.resize(&sid, size.cols, size.rows).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// `POST /terminal/{sid}/disconnect`
pub async fn disconnect(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> impl IntoResponse {
    state.polling.discard(&sid);
    Json(json!({ "status": "disconnected" }))
}
