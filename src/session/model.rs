//! In-memory session objects.
//!
//! A [`Session`] carries the immutable facts picked at creation (id, host
//! port, workspace) plus a small mutable core behind its own lock: lifecycle
//! state, transport reference count, and the last-access timestamp. The lock
//! is a plain mutex held only for field access, never across I/O.

use crate::env;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Slot reserved, container spawn in flight
    Creating,
    /// Container running, transports may attach
    Ready,
    /// Teardown in flight
    Deleting,
}

impl SessionState {
    /// Lowercase wire form used in status payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Creating => "creating",
            SessionState::Ready => "ready",
            SessionState::Deleting => "deleting",
        }
    }
}

/// Generate a fresh opaque session identifier: 48 bytes of CSPRNG output,
/// URL-safe base64, 64 characters.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 48];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug)]
struct SessionMut {
    state: SessionState,
    ref_count: u32,
    last_accessed_at: DateTime<Utc>,
}

/// One live session.
#[derive(Debug)]
pub struct Session {
    /// Opaque URL-safe identifier, immutable
    pub id: String,
    /// Deterministic container name derived from the id
    pub container_name: String,
    /// Host loopback port bound onto the agent port
    pub host_port: u16,
    /// Host directory mounted as the in-container home
    pub workspace: PathBuf,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    inner: Mutex<SessionMut>,
}

impl Session {
    /// Create a session record in the given initial state.
    pub fn new(id: String, host_port: u16, workspace: PathBuf, state: SessionState) -> Self {
        let container_name = env::container_name_for_session(&id);
        let now = Utc::now();
        Self {
            id,
            container_name,
            host_port,
            workspace,
            created_at: now,
            inner: Mutex::new(SessionMut {
                state,
                ref_count: 0,
                last_accessed_at: now,
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().unwrap().state
    }

    /// Move to a new lifecycle state.
    pub fn set_state(&self, state: SessionState) {
        self.inner.lock().unwrap().state = state;
    }

    /// Number of transports currently bridging this session.
    pub fn ref_count(&self) -> u32 {
        self.inner.lock().unwrap().ref_count
    }

    /// Timestamp of the last successful access.
    pub fn last_accessed_at(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap().last_accessed_at
    }

    /// Record an access now.
    pub fn touch(&self) {
        self.inner.lock().unwrap().last_accessed_at = Utc::now();
    }

    /// Atomically increment the reference count if the session is READY.
    ///
    /// Returns the current state on refusal.
    pub(crate) fn try_acquire_ref(&self) -> std::result::Result<(), SessionState> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != SessionState::Ready {
            return Err(inner.state);
        }
        inner.ref_count += 1;
        Ok(())
    }

    /// Decrement the reference count, clamped at zero.
    pub(crate) fn release_ref(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.ref_count = inner.ref_count.saturating_sub(1);
    }

    /// Atomic deletability check: move READY to DELETING.
    ///
    /// With `force` the reference count is ignored; otherwise the transition
    /// is refused while transports hold references.
    pub(crate) fn try_begin_delete(&self, force: bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if !force && !(inner.state == SessionState::Ready && inner.ref_count == 0) {
            return false;
        }
        inner.state = SessionState::Deleting;
        true
    }

    /// Point-in-time copy of the observable fields.
    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().unwrap();
        SessionSnapshot {
            id: self.id.clone(),
            container_name: self.container_name.clone(),
            host_port: self.host_port,
            state: inner.state,
            ref_count: inner.ref_count,
            created_at: self.created_at,
            last_accessed_at: inner.last_accessed_at,
        }
    }
}

/// Point-in-time view of a session, used by listings and diagnostics.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: String,
    pub container_name: String,
    pub host_port: u16,
    pub state: SessionState,
    pub ref_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Reference held by a transport for the duration of its bridge.
///
/// Releases on drop so every exit path, including panics and cancelled
/// tasks, gives the reference back.
pub struct SessionRef {
    session: Arc<Session>,
}

impl SessionRef {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// The referenced session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for SessionRef {
    fn drop(&mut self) {
        self.session.release_ref();
    }
}

impl std::ops::Deref for SessionRef {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}
