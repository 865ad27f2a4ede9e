//! HTTP surface.
//!
//! Routes, the authorization gate, and the error responder. Handlers stay
//! thin: they translate HTTP in and out of the session, transport, and auth
//! layers.
//!
//! - [`authz`]: principal resolution + ownership middleware
//! - [`sessions`]: session lifecycle endpoints
//! - [`terminal`]: socket and polling transports
//! - [`login`]: form auth over the [`Authenticator`](crate::auth::Authenticator)
//! - [`error`]: the error taxonomy responder

pub mod authz;
pub mod error;
pub mod login;
pub mod sessions;
pub mod terminal;

use crate::auth::{Authenticator, RateLimiter};
use crate::session::SessionManager;
use crate::transport::PollingStation;
use axum::Router;
use axum::routing::{delete, get, post};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub polling: Arc<PollingStation>,
    pub auth: Arc<dyn Authenticator>,
    pub limiter: Arc<RateLimiter>,
    /// Test hook: production configuration always sets this.
    pub secure_cookies: bool,
}

/// Assemble the router with the gate and request tracing applied.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(sessions::landing))
        .route("/session/new", post(sessions::create_session))
        .route("/session/{sid}", delete(sessions::delete_session))
        .route("/session/{sid}/status", get(sessions::session_status))
        .route("/my/sessions", get(sessions::my_sessions))
        .route("/sessions", get(sessions::admin_sessions))
        .route("/terminal/{sid}", get(terminal::terminal_page))
        .route("/terminal/{sid}/ws", get(terminal::ws_attach))
        .route("/terminal/{sid}/connect", post(terminal::connect))
        .route("/terminal/{sid}/poll", get(terminal::poll))
        .route("/terminal/{sid}/input", post(terminal::input))
        .route("/terminal/{sid}/resize", post(terminal::resize))
        .route("/terminal/{sid}/disconnect", post(terminal::disconnect))
        .route("/login", get(login::login_page).post(login::login_submit))
        .route("/logout", get(login::logout))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authz::gate,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthConfig, LocalAuthenticator, UserEntry};
    use crate::container::fake::FakeRuntime;
    use crate::owners::OwnerStore;
    use crate::session::SessionManagerConfig;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode, header};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        router: Router,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let owners = Arc::new(
            OwnerStore::load(dir.path().join("session_owners.json"))
                .await
                .unwrap(),
        );
        let runtime = Arc::new(FakeRuntime::default());
        let manager = Arc::new(SessionManager::new(
            SessionManagerConfig {
                data_dir: dir.path().to_path_buf(),
                settle: Duration::ZERO,
                workspace_owner: None,
                ..Default::default()
            },
            runtime,
            owners,
        ));

        let mut users = HashMap::new();
        for (name, admin) in [("alice", false), ("eve", false), ("root", true)] {
            users.insert(
                name.to_string(),
                UserEntry {
                    password_hash: bcrypt::hash("pw", 4).unwrap(),
                    admin,
                },
            );
        }
        let auth = Arc::new(LocalAuthenticator::from_config(AuthConfig {
            session_timeout_hours: 1,
            users,
        }));

        let state = AppState {
            manager: manager.clone(),
            polling: Arc::new(PollingStation::new(manager)),
            auth,
            limiter: Arc::new(RateLimiter::default()),
            secure_cookies: false,
        };

        let router = build_router(state)
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 49152))));
        Harness {
            router,
            _dir: dir,
        }
    }

    async fn login(harness: &Harness, user: &str, password: &str) -> Option<String> {
        let response = harness
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(format!(
                        "username={user}&password={password}&next=/"
                    )))
                    .unwrap(),
            )
            .await
            .unwrap();

        response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.to_string())
    }

    async fn request(
        harness: &Harness,
        method: &str,
        uri: &str,
        cookie: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let response = harness
            .router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_unauthenticated_get_redirects_to_login() {
        let harness = harness().await;
        let response = harness
            .router
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("/login"));
    }

    #[tokio::test]
    async fn test_unauthenticated_post_redirects_to_login() {
        let harness = harness().await;
        let response = harness
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/session/new")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert_eq!(location, "/login?next=/session/new");
    }

    #[tokio::test]
    async fn test_bad_credentials_do_not_mint_cookie() {
        let harness = harness().await;
        assert_eq!(login(&harness, "alice", "wrong").await, None);
        assert_eq!(login(&harness, "ghost", "pw").await, None);
    }

    #[tokio::test]
    async fn test_session_lifecycle_over_http() {
        let harness = harness().await;
        let cookie = login(&harness, "alice", "pw").await.unwrap();

        let (status, body) =
            request(&harness, "POST", "/session/new", Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);
        let sid = body["session_id"].as_str().unwrap().to_string();
        assert_eq!(body["redirect"], format!("/terminal/{sid}"));

        let (status, body) = request(
            &harness,
            "GET",
            &format!("/session/{sid}/status"),
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");

        let (status, body) = request(
            &harness,
            "GET",
            "/my/sessions",
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessions"][0]["id"], sid.as_str());
        assert_eq!(body["sessions"][0]["status"], "running");

        let (status, body) = request(
            &harness,
            "DELETE",
            &format!("/session/{sid}"),
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "deleted");

        // Gone from the ownership map: the gate now reports 404.
        let (status, _) = request(
            &harness,
            "GET",
            &format!("/session/{sid}/status"),
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Idempotent teardown.
        let (status, body) = request(
            &harness,
            "DELETE",
            &format!("/session/{sid}"),
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "deleted");
    }

    #[tokio::test]
    async fn test_cross_principal_access_denied() {
        let harness = harness().await;
        let alice = login(&harness, "alice", "pw").await.unwrap();
        let eve = login(&harness, "eve", "pw").await.unwrap();

        let (_, body) = request(&harness, "POST", "/session/new", Some(&alice)).await;
        let sid = body["session_id"].as_str().unwrap().to_string();

        let (status, _) = request(
            &harness,
            "GET",
            &format!("/session/{sid}/status"),
            Some(&eve),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) =
            request(&harness, "GET", &format!("/terminal/{sid}"), Some(&eve)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // Unknown sessions are indistinguishable from unowned for non-DELETE.
        let (status, _) = request(
            &harness,
            "GET",
            "/session/does-not-exist/status",
            Some(&eve),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_quota_maps_to_429() {
        let harness = harness().await;
        let cookie = login(&harness, "alice", "pw").await.unwrap();

        for _ in 0..crate::env::MAX_SESSIONS_PER_USER {
            let (status, _) =
                request(&harness, "POST", "/session/new", Some(&cookie)).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) = request(&harness, "POST", "/session/new", Some(&cookie)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_admin_listing_withholds_session_ids() {
        let harness = harness().await;
        let alice = login(&harness, "alice", "pw").await.unwrap();
        let root = login(&harness, "root", "pw").await.unwrap();

        let (_, body) = request(&harness, "POST", "/session/new", Some(&alice)).await;
        let sid = body["session_id"].as_str().unwrap().to_string();

        let (status, _) = request(&harness, "GET", "/sessions", Some(&alice)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = request(&harness, "GET", "/sessions", Some(&root)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessions"][0]["owner"], "alice");
        assert!(!body.to_string().contains(&sid));
    }

    #[tokio::test]
    async fn test_poll_without_connect_is_gone() {
        let harness = harness().await;
        let cookie = login(&harness, "alice", "pw").await.unwrap();

        let (_, body) = request(&harness, "POST", "/session/new", Some(&cookie)).await;
        let sid = body["session_id"].as_str().unwrap().to_string();

        let (status, _) = request(
            &harness,
            "GET",
            &format!("/terminal/{sid}/poll?cursor=0&timeout=1"),
            Some(&cookie),
        )
        .await;
        assert_eq!(status, StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_logout_invalidates_cookie() {
        let harness = harness().await;
        let cookie = login(&harness, "alice", "pw").await.unwrap();

        let (status, _) = request(&harness, "GET", "/my/sessions", Some(&cookie)).await;
        assert_eq!(status, StatusCode::OK);

        let response = harness
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/logout")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        // The destroyed cookie no longer authenticates; the gate redirects
        // back to the login form.
        let response = harness
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/session/new")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }
}
