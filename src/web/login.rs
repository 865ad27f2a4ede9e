//! Form login over the authenticator.

use crate::env;
use crate::web::AppState;
use crate::web::authz::{client_address, sanitize_next};
use crate::web::error::ApiError;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    #[serde(default)]
    pub next: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// `GET /login`
pub async fn login_page(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
) -> Response {
    if !state.auth.is_enabled() {
        return Redirect::to("/").into_response();
    }

    let next = sanitize_next(&query.next).unwrap_or("/");
    let notice = if query.error.is_some() {
        "<p>Login failed.</p>"
    } else {
        ""
    };
    Html(format!(
        "<!doctype html><html><head><title>login</title></head><body>{notice}\
         <form method=\"post\" action=\"/login\">\
         <input type=\"hidden\" name=\"next\" value=\"{next}\">\
         <input name=\"username\" autocomplete=\"username\">\
         <input name=\"password\" type=\"password\" autocomplete=\"current-password\">\
         <button type=\"submit\">Sign in</button>\
         </form></body></html>"
    ))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub next: String,
}

/// `POST /login`
pub async fn login_submit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Result<Response, ApiError> {
    if !state.auth.is_enabled() {
        return Ok(Redirect::to("/").into_response());
    }

    let address = client_address(&headers, &peer.ip().to_string());
    if state.limiter.is_blocked(&form.username, &address) {
        warn!(
            "Login rate limited for '{}' from {} ({}s remaining)",
            form.username,
            address,
            state.limiter.lockout_remaining_secs(&form.username, &address)
        );
        return Err(ApiError::RateLimited);
    }

    if !state.auth.authenticate(&form.username, &form.password).await {
        state.limiter.record_failure(&form.username, &address);
        info!("Login failed for '{}' from {}", form.username, address);
        return Ok(Redirect::to("/login?error=1").into_response());
    }

    state.limiter.clear_on_success(&form.username, &address);
    let token = state.auth.create_session(&form.username);
    let target = sanitize_next(&form.next).unwrap_or("/").to_string();
    info!("Login succeeded for '{}'", form.username);

    let cookie = session_cookie_value(
        &token,
        state.auth.session_ttl().as_secs(),
        state.secure_cookies,
    );
    Ok(with_cookie(Redirect::to(&target).into_response(), &cookie))
}

/// `GET /logout`
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    if let Some(cookie) = jar.get(env::SESSION_COOKIE) {
        state.auth.destroy_session(cookie.value());
    }
    let expired = session_cookie_value("", 0, state.secure_cookies);
    with_cookie(Redirect::to("/login").into_response(), &expired)
}

/// Render the `Set-Cookie` value with the fixed attribute set. `secure` is
/// dropped only through the dedicated test hook, never in production
/// configuration.
fn session_cookie_value(token: &str, max_age_secs: u64, secure: bool) -> String {
    let mut value = format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        env::SESSION_COOKIE,
        token,
        max_age_secs
    );
    if secure {
        value.push_str("; Secure");
    }
    value
}

fn with_cookie(mut response: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        Err(e) => warn!("Unrepresentable cookie value: {}", e),
    }
    response
}
