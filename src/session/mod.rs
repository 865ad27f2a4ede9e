//! Session lifecycle management.
//!
//! A session is a principal-owned terminal backed by one container. This
//! module owns the mapping from session ids to containers, the
//! `CREATING -> READY -> DELETING` state machine, reference counting for
//! attached transports, startup recovery, and the per-principal quota.
//!
//! - [`model`]: the in-memory session object and its reference guard
//! - [`manager`]: table, locks, creation/deletion, quota
//! - [`recovery`]: startup reassociation of surviving containers

pub mod manager;
pub mod model;
mod recovery;

#[cfg(test)]
mod tests;

pub use manager::{SessionManager, SessionManagerConfig};
pub use model::{Session, SessionRef, SessionSnapshot, SessionState, new_session_id};

use crate::container::ContainerError;
use crate::ports::PortError;

/// Session lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session with the requested id
    #[error("session not found")]
    NotFound,

    /// Session exists but is not in the READY state
    #[error("session is not ready")]
    NotReady,

    /// The principal already owns the maximum number of sessions
    #[error("session quota exceeded")]
    QuotaExceeded,

    /// Host port range exhausted
    #[error(transparent)]
    Ports(#[from] PortError),

    /// Container runtime failure
    #[error(transparent)]
    Runtime(#[from] ContainerError),

    /// Workspace or data-directory IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Ownership persistence failure
    #[error("ownership store error: {0}")]
    Owners(#[from] anyhow::Error),
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
