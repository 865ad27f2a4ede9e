//! # Vibeterm
//!
//! A multi-tenant web-terminal broker. Each authenticated user gets a
//! private interactive shell inside a freshly spawned sandbox container,
//! kept alive across browser disconnects, broker restarts, and host
//! reboots. Every byte of terminal I/O and every lifecycle command flows
//! through the broker.
//!
//! ## Architecture Overview
//!
//! - **[`session`]**: session table, lifecycle state machine, reference
//!   counting, per-principal quotas, startup recovery
//! - **[`container`]**: the container runtime seam over the bollard
//!   Docker/Podman API
//! - **[`transport`]**: socket tunnel and replay-buffered long polling
//!   between browser and in-container agent
//! - **[`auth`]**: the authenticator seam, local credential table, and the
//!   failed-login rate limiter
//! - **[`web`]**: HTTP surface with the authentication/ownership gate
//! - **[`reconcile`]**: background drift repair against the runtime
//!
//! ## Lifecycle sketch
//!
//! A principal authenticates and asks for a session; the manager allocates
//! a loopback host port, spawns a container with the user's workspace bind
//! mounted, and records ownership. Transports attach through the gate and
//! hold a reference on the session while bridging to the agent. Deletion
//! tears the container down; recovery at the next boot reassociates
//! whatever containers survived.

/// Environment constants and path utilities.
///
/// Centralizes hardcoded names, limits, and the data-directory layout used
/// throughout the broker.
pub mod env;

/// Host port allocation for session containers.
pub mod ports;

/// Durable session ownership map.
pub mod owners;

/// Container runtime layer over the bollard API.
pub mod container;

/// Authentication seam, local credential table, and login rate limiter.
pub mod auth;

/// Session lifecycle management: table, state machine, quotas, recovery.
pub mod session;

/// Terminal transports: socket tunnel and long polling with replay.
pub mod transport;

/// HTTP surface and the authorization gate.
pub mod web;

/// Background reconciliation of sessions, login sessions, and transports.
pub mod reconcile;

/// Command-line arguments and broker configuration.
pub mod cli;

// Re-export the main types
pub use auth::{Authenticator, DisabledAuthenticator, LocalAuthenticator, RateLimiter};
pub use container::{ContainerClient, ContainerError, ContainerRuntime, DockerRuntime};
pub use owners::OwnerStore;
pub use reconcile::Reconciler;
pub use session::{Session, SessionError, SessionManager, SessionManagerConfig, SessionState};
pub use transport::PollingStation;
pub use web::{AppState, build_router};
