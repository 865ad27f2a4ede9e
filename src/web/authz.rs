//! Authentication and ownership gate.
//!
//! Two-stage pre-request middleware. Stage one resolves the principal from
//! the login cookie (or the anonymous sentinel when authentication is
//! disabled). Stage two enforces per-session ownership for any path that
//! names a session. The WebSocket attach path is exempt: it performs the
//! same checks itself so refusals arrive as close codes the browser's
//! WebSocket API can observe.

use crate::env;
use crate::web::AppState;
use crate::web::error::ApiError;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

/// Resolved request principal, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct Principal(pub String);

/// Extract the login cookie value from request headers.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == env::SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Resolve the principal for a request, or None when authentication is
/// required and missing.
pub fn resolve_principal(state: &AppState, headers: &HeaderMap) -> Option<String> {
    if !state.auth.is_enabled() {
        return Some(env::ANONYMOUS_PRINCIPAL.to_string());
    }
    let token = session_cookie(headers)?;
    state.auth.validate(&token)
}

/// Accept `next` redirect targets only when they are same-origin relative
/// paths: begin with `/`, not `//`, no scheme or host smuggling.
pub fn sanitize_next(raw: &str) -> Option<&str> {
    if raw.starts_with('/') && !raw.starts_with("//") && !raw.starts_with("/\\") {
        Some(raw)
    } else {
        None
    }
}

/// Client address for rate limiting: first `X-Forwarded-For` element when
/// the reverse proxy supplies one, else the direct peer.
pub fn client_address(headers: &HeaderMap, peer: &str) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.to_string())
}

fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Paths that bypass both stages.
fn is_public_path(path: &str) -> bool {
    path == "/login" || path == "/logout" || path.starts_with("/static/")
}

/// Session id named by the path, if any: `/session/{sid}/...` (but not
/// `/session/new`) and `/terminal/{sid}/...`.
fn session_id_in_path(path: &str) -> Option<&str> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match segments.next()? {
        "session" => {
            let sid = segments.next()?;
            (sid != "new").then_some(sid)
        }
        "terminal" => segments.next(),
        _ => None,
    }
}

/// The gate middleware.
pub async fn gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();

    if is_public_path(&path) {
        return next.run(request).await;
    }

    // The socket attach closes with its own status codes after the upgrade.
    if path.starts_with("/terminal/") && path.ends_with("/ws") {
        return next.run(request).await;
    }

    // Stage 1: authentication. Upgrade requests get a plain 401; regular
    // requests are sent to the login form.
    let Some(principal) = resolve_principal(&state, request.headers()) else {
        if is_upgrade_request(request.headers()) {
            return ApiError::Unauthenticated.into_response();
        }
        let target = sanitize_next(&path).unwrap_or("/");
        return Redirect::to(&format!("/login?next={target}")).into_response();
    };

    // Stage 2: ownership, for paths that name a session.
    if let Some(sid) = session_id_in_path(&path) {
        match state.manager.owners().get(sid).await {
            Some(owner) if owner == principal => {}
            Some(_) => return ApiError::Forbidden.into_response(),
            // A missing row refuses access without revealing anything,
            // except for DELETE where idempotent teardown of orphaned rows
            // is allowed for the requester.
            None if request.method() == Method::DELETE => {}
            None => return ApiError::NotFound.into_response(),
        }
    }

    request.extensions_mut().insert(Principal(principal));
    next.run(request).await
}
