//! Local credential table authenticator.
//!
//! Users live in a TOML file with bcrypt password hashes. Login sessions are
//! random tokens held in server memory; restarting the broker logs everyone
//! out, which is acceptable because terminal sessions themselves survive via
//! recovery.

use crate::auth::Authenticator;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

/// Bcrypt hash checked when the username is unknown, so authentication takes
/// the same time whether or not the user exists.
const DUMMY_HASH: &str = "$2b$12$000000000000000000000uKoqMVCTTroULWJLFy6UaGfYXMqNJSdq";

/// One row of the credential table.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub password_hash: String,
    #[serde(default)]
    pub admin: bool,
}

/// Shape of the auth config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_timeout_hours")]
    pub session_timeout_hours: u64,
    #[serde(default)]
    pub users: HashMap<String, UserEntry>,
}

fn default_timeout_hours() -> u64 {
    24
}

struct LoginSession {
    username: String,
    created_at: DateTime<Utc>,
}

/// [`Authenticator`] over an on-disk credential table.
pub struct LocalAuthenticator {
    config: AuthConfig,
    ttl: Duration,
    sessions: Mutex<HashMap<String, LoginSession>>,
}

impl LocalAuthenticator {
    /// Load the credential table from `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: AuthConfig = toml::from_str(&raw)?;
        info!(
            "Authentication enabled — {} local user(s) configured",
            config.users.len()
        );
        Ok(Self::from_config(config))
    }

    /// Build from an already-parsed config.
    pub fn from_config(config: AuthConfig) -> Self {
        let ttl = Duration::from_secs(config.session_timeout_hours * 3600);
        Self {
            config,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn expired(&self, session: &LoginSession) -> bool {
        let age = Utc::now().signed_duration_since(session.created_at);
        age.to_std().map(|age| age > self.ttl).unwrap_or(true)
    }
}

#[async_trait]
impl Authenticator for LocalAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> bool {
        if username.is_empty() || password.is_empty() {
            // Burn the same time as a real check to avoid a timing oracle.
            let _ = bcrypt::verify("dummy", DUMMY_HASH);
            return false;
        }

        match self.config.users.get(username) {
            Some(entry) => match bcrypt::verify(password, &entry.password_hash) {
                Ok(ok) => ok,
                Err(_) => {
                    warn!("Invalid password hash for local user '{}'", username);
                    false
                }
            },
            None => {
                let _ = bcrypt::verify(password, DUMMY_HASH);
                false
            }
        }
    }

    fn create_session(&self, username: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        self.sessions.lock().unwrap().insert(
            token.clone(),
            LoginSession {
                username: username.to_string(),
                created_at: Utc::now(),
            },
        );
        info!("Login session created for user '{}'", username);
        token
    }

    fn validate(&self, token: &str) -> Option<String> {
        if token.is_empty() {
            return None;
        }
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get(token)?;
        if self.expired(session) {
            sessions.remove(token);
            return None;
        }
        Some(session.username.clone())
    }

    fn destroy_session(&self, token: &str) {
        self.sessions.lock().unwrap().remove(token);
    }

    fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| self.expired(s))
            .map(|(tok, _)| tok.clone())
            .collect();
        for tok in &expired {
            sessions.remove(tok);
        }
        expired.len()
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn session_ttl(&self) -> Duration {
        self.ttl
    }

    fn is_admin(&self, principal: &str) -> bool {
        self.config
            .users
            .get(principal)
            .map(|u| u.admin)
            .unwrap_or(false)
    }
}

/// Authenticator used when no credential table exists. Every request runs as
/// the anonymous principal and the server binds to loopback only.
pub struct DisabledAuthenticator;

#[async_trait]
impl Authenticator for DisabledAuthenticator {
    async fn authenticate(&self, _username: &str, _password: &str) -> bool {
        false
    }

    fn create_session(&self, _username: &str) -> String {
        String::new()
    }

    fn validate(&self, _token: &str) -> Option<String> {
        None
    }

    fn destroy_session(&self, _token: &str) {}

    fn purge_expired(&self) -> usize {
        0
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn session_ttl(&self) -> Duration {
        Duration::ZERO
    }

    fn is_admin(&self, _principal: &str) -> bool {
        false
    }
}
