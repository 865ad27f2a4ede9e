//! HTTP error mapping.
//!
//! One responder type carries the whole error taxonomy so every handler maps
//! failures the same way. Authorization failures never reveal whether a
//! session exists.

use crate::session::SessionError;
use crate::transport::TransportError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

/// Error surfaced to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed input, bad redirect target, traversal attempt
    #[error("{0}")]
    Validation(String),

    /// No valid login session
    #[error("authentication required")]
    Unauthenticated,

    /// Authenticated but not the owner / not an admin
    #[error("forbidden")]
    Forbidden,

    /// Unknown session or resource
    #[error("not found")]
    NotFound,

    /// Delete refused while transports are attached
    #[error("session has active connections")]
    Conflict,

    /// Polling transport dead; client must reconnect
    #[error("transport gone; reconnect")]
    Gone,

    /// Per-principal session cap reached
    #[error("session limit reached")]
    QuotaExceeded,

    /// Login attempts rate limited
    #[error("too many failed login attempts")]
    RateLimited,

    /// Agent or runtime unreachable during attach
    #[error("session backend unavailable")]
    Unavailable(String),

    /// Runtime or internal failure
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Gone => StatusCode::GONE,
            ApiError::QuotaExceeded | ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            match &self {
                ApiError::Internal(detail) => error!("Internal error: {}", detail),
                other => error!("Internal error: {}", other),
            }
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound => ApiError::NotFound,
            SessionError::NotReady => ApiError::Unavailable("session is not ready".to_string()),
            SessionError::QuotaExceeded => ApiError::QuotaExceeded,
            SessionError::Ports(e) => ApiError::Internal(e.to_string()),
            SessionError::Runtime(e) => ApiError::Internal(e.to_string()),
            SessionError::Io(e) => ApiError::Internal(e.to_string()),
            SessionError::Owners(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Gone => ApiError::Gone,
            TransportError::ConnectTimeout => {
                ApiError::Unavailable("agent connect timed out".to_string())
            }
            TransportError::Upstream(e) => ApiError::Unavailable(e.to_string()),
            TransportError::Session(e) => e.into(),
        }
    }
}
