//! Authentication seam and login protection.
//!
//! The broker consumes the [`Authenticator`] trait and never cares how
//! credentials are checked. [`LocalAuthenticator`] implements it over a
//! bcrypt credential table on disk; when no table is configured the broker
//! runs with [`DisabledAuthenticator`] and binds to loopback only.
//!
//! - [`local`]: credential table + in-memory login sessions
//! - [`ratelimit`]: failed-login limiter keyed by principal and source address

mod local;
mod ratelimit;

pub use local::{AuthConfig, DisabledAuthenticator, LocalAuthenticator, UserEntry};
pub use ratelimit::RateLimiter;

use async_trait::async_trait;
use std::time::Duration;

/// Validates principal credentials and manages opaque login sessions.
///
/// Login sessions are distinct from terminal sessions: one is a browser
/// cookie, the other is a container.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Check a username/password pair.
    async fn authenticate(&self, username: &str, password: &str) -> bool;

    /// Mint an opaque session token for an authenticated principal.
    fn create_session(&self, username: &str) -> String;

    /// Resolve a session token to its principal, if the token is valid and
    /// unexpired.
    fn validate(&self, token: &str) -> Option<String>;

    /// Remove a session token (logout).
    fn destroy_session(&self, token: &str);

    /// Drop every expired session. Returns the number removed.
    fn purge_expired(&self) -> usize;

    /// Whether a credential source is configured at all.
    fn is_enabled(&self) -> bool;

    /// Lifetime of a freshly minted session.
    fn session_ttl(&self) -> Duration;

    /// Whether the principal may use administrative endpoints.
    fn is_admin(&self, principal: &str) -> bool;
}
