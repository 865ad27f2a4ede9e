//! Session lifecycle endpoints.

use crate::container::{ContainerError, ContainerRuntime};
use crate::env;
use crate::web::AppState;
use crate::web::authz::Principal;
use crate::web::error::ApiError;
use axum::extract::{Path, Query, State};
use axum::response::Html;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

/// Landing page. The real UI is served by templates outside the core; this
/// keeps the route surface complete.
pub async fn landing() -> Html<&'static str> {
    Html(
        "<!doctype html><html><head><title>vibeterm</title></head>\
         <body><h1>vibeterm</h1>\
         <p>POST /session/new to create a terminal session.</p>\
         </body></html>",
    )
}

/// `POST /session/new` — create a session for the calling principal.
pub async fn create_session(
    State(state): State<AppState>,
    Extension(Principal(principal)): Extension<Principal>,
) -> Result<Json<Value>, ApiError> {
    let session = state.manager.create_for(&principal).await?;
    info!("Created session for principal '{}'", principal);
    Ok(Json(json!({
        "session_id": session.id,
        "redirect": format!("/terminal/{}", session.id),
    })))
}

/// `GET /session/{sid}/status`
pub async fn session_status(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let session = state.manager.get(&sid).ok_or(ApiError::NotFound)?;
    let snapshot = session.snapshot();
    Ok(Json(json!({
        "status": snapshot.state.as_str(),
        "created_at": snapshot.created_at,
        "last_accessed_at": snapshot.last_accessed_at,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub force: bool,
}

/// `DELETE /session/{sid}` — idempotent teardown.
///
/// A session absent from the manager may still leave an ownership row or a
/// container behind (orphaned mid-recovery or mid-delete); those are cleaned
/// up and reported as deleted.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<Value>, ApiError> {
    if state.manager.get(&sid).is_none() {
        let name = env::container_name_for_session(&sid);
        if let Err(e) = state.manager.runtime().remove(&name, true).await {
            if !matches!(e, ContainerError::NotFound(_)) {
                warn!("Orphan container removal for {} failed: {}", name, e);
            }
        }
        if let Err(e) = state.manager.owners().remove(&sid).await {
            warn!("Orphan ownership removal failed: {}", e);
        }
        return Ok(Json(json!({ "status": "deleted" })));
    }

    if params.force {
        state.polling.discard(&sid);
    }
    if state.manager.delete(&sid, params.force).await {
        Ok(Json(json!({ "status": "deleted" })))
    } else if state.manager.get(&sid).is_none() {
        // Lost a race against another delete; still torn down.
        Ok(Json(json!({ "status": "deleted" })))
    } else {
        Err(ApiError::Conflict)
    }
}

/// `GET /my/sessions` — the caller's sessions with live container status.
/// Rows whose container is gone (and which no in-memory session backs) are
/// pruned on the way through.
pub async fn my_sessions(
    State(state): State<AppState>,
    Extension(Principal(principal)): Extension<Principal>,
) -> Result<Json<Value>, ApiError> {
    let sids = state.manager.owners().list_by(&principal).await;
    let mut sessions = Vec::new();

    for sid in sids {
        let name = env::container_name_for_session(&sid);
        match state.manager.runtime().inspect(&name).await {
            Ok(inspection) => {
                let status = if inspection.running { "running" } else { "stopped" };
                let snapshot = state.manager.get(&sid).map(|s| s.snapshot());
                sessions.push(json!({
                    "id": sid,
                    "status": status,
                    "created_at": snapshot.as_ref().map(|s| s.created_at),
                    "last_accessed_at": snapshot.as_ref().map(|s| s.last_accessed_at),
                }));
            }
            Err(ContainerError::NotFound(_)) => {
                if state.manager.get(&sid).is_some() {
                    // Drift the reconciler will settle; don't prune a live
                    // session's row.
                    sessions.push(json!({ "id": sid, "status": "unknown" }));
                } else {
                    info!("Pruning ownership row for vanished session");
                    if let Err(e) = state.manager.owners().remove(&sid).await {
                        warn!("Prune failed: {}", e);
                    }
                }
            }
            Err(e) => {
                warn!("Inspect for {} failed: {}", name, e);
                sessions.push(json!({ "id": sid, "status": "unknown" }));
            }
        }
    }

    Ok(Json(json!({ "sessions": sessions })))
}

/// `GET /sessions` — admin overview. Session ids are withheld; admins manage
/// capacity, they don't get attach tokens.
pub async fn admin_sessions(
    State(state): State<AppState>,
    Extension(Principal(principal)): Extension<Principal>,
) -> Result<Json<Value>, ApiError> {
    if !state.auth.is_admin(&principal) {
        return Err(ApiError::Forbidden);
    }

    let mut sessions = Vec::new();
    for snapshot in state.manager.list() {
        let owner = state.manager.owners().get(&snapshot.id).await;
        sessions.push(json!({
            "owner": owner,
            "status": snapshot.state.as_str(),
            "created_at": snapshot.created_at,
            "last_accessed_at": snapshot.last_accessed_at,
            "connections": snapshot.ref_count,
        }));
    }

    Ok(Json(json!({ "sessions": sessions })))
}
