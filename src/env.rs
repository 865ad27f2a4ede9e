//! Environment constants and path utilities for the terminal broker.
//!
//! This module centralizes the hardcoded names, limits, and directory layout
//! used throughout the application, making them easier to maintain and modify.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for every container the broker owns. Recovery and drift sweeps
/// enumerate the runtime by this prefix.
pub const CONTAINER_NAME_PREFIX: &str = "vibe-session-";

/// Number of leading session-id characters used in the container name.
pub const CONTAINER_NAME_ID_LEN: usize = 12;

/// Length in characters of a session identifier (URL-safe base64 of 48
/// random bytes).
pub const SESSION_ID_LEN: usize = 64;

/// Port inside the container where the terminal agent listens.
pub const AGENT_PORT: u16 = 7681;

/// Host port range handed out to sessions, half-open.
pub const PORT_RANGE_START: u16 = 17000;
pub const PORT_RANGE_END: u16 = 18000;

/// Maximum number of live sessions a single principal may own.
pub const MAX_SESSIONS_PER_USER: usize = 3;

/// Memory cap applied to every session container.
pub const CONTAINER_MEMORY_BYTES: i64 = 2 * 1024 * 1024 * 1024;

/// Time to wait after starting a container before the agent is assumed ready.
pub const AGENT_SETTLE: Duration = Duration::from_secs(2);

/// Timeout for opening the upstream socket to the agent.
pub const AGENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Application-level keepalive interval and pong deadline on the upstream
/// agent socket.
pub const AGENT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Capacity of the polling replay buffer, per session.
pub const POLL_BUFFER_CAPACITY: usize = 256 * 1024;

/// A polling transport with no endpoint activity for this long is reaped.
pub const POLL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Bounds applied to the client-supplied poll timeout, in seconds.
pub const POLL_TIMEOUT_MIN_SECS: u64 = 1;
pub const POLL_TIMEOUT_MAX_SECS: u64 = 60;

/// Reconciler sub-loop intervals.
pub const DRIFT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
pub const AUTH_PURGE_INTERVAL: Duration = Duration::from_secs(3600);
pub const POLL_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Failed-login limiter: cap per key within the sliding window.
pub const RATE_LIMIT_MAX_ATTEMPTS: usize = 50;
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Name of the login session cookie.
pub const SESSION_COOKIE: &str = "vibe_session";

/// Principal that owns everything when authentication is disabled.
pub const ANONYMOUS_PRINCIPAL: &str = "__anonymous__";

/// Numeric uid/gid owning workspace files inside the container.
pub const WORKSPACE_UID: u32 = 1000;
pub const WORKSPACE_GID: u32 = 1000;

/// Ownership map file name within the data directory.
pub const OWNERS_FILE_NAME: &str = "session_owners.json";

/// Workspaces directory name within the data directory.
pub const WORKSPACES_DIR_NAME: &str = "workspaces";

/// Build the ownership map path from a data directory.
pub fn owners_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join(OWNERS_FILE_NAME)
}

/// Build the workspaces directory path from a data directory.
pub fn workspaces_dir_path(data_dir: &Path) -> PathBuf {
    data_dir.join(WORKSPACES_DIR_NAME)
}

/// Build a specific session workspace path.
pub fn workspace_path(data_dir: &Path, session_id: &str) -> PathBuf {
    workspaces_dir_path(data_dir).join(session_id)
}

/// Derive the deterministic container name for a session id.
pub fn container_name_for_session(session_id: &str) -> String {
    let short = session_id
        .get(..CONTAINER_NAME_ID_LEN)
        .unwrap_or(session_id);
    format!("{CONTAINER_NAME_PREFIX}{short}")
}
