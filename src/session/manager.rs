//! Central session manager.
//!
//! Coordinates the session table, host port allocation, per-principal
//! quotas, and container lifecycle. Two lock levels: the manager lock guards
//! the table and the port set; each session guards its own mutable core.
//! Manager before session, and neither is ever held across a runtime call,
//! a disk write, or a sleep. Long operations reserve a slot in the table
//! first and finalize it afterwards.

use crate::container::{ContainerError, ContainerRuntime, SessionContainerSpec};
use crate::env;
use crate::owners::OwnerStore;
use crate::ports::PortAllocator;
use crate::session::model::{Session, SessionRef, SessionSnapshot, SessionState, new_session_id};
use crate::session::{Result, SessionError};
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Configuration for the session manager.
#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    /// Agent image spawned for every session
    pub image: String,
    /// Broker data directory (ownership file, workspaces)
    pub data_dir: PathBuf,
    /// Port the agent listens on inside the container
    pub agent_port: u16,
    /// Memory cap per container in bytes
    pub memory_bytes: i64,
    /// Optional CPU quota per 100ms period; None leaves CPU unlimited
    pub cpu_quota: Option<i64>,
    /// Wait after container start before the agent is assumed ready
    pub settle: Duration,
    /// Per-principal session cap
    pub max_sessions_per_user: usize,
    /// Host port range, half-open
    pub port_range: (u16, u16),
    /// uid/gid given ownership of each workspace; None skips the chown
    /// (fixtures running unprivileged)
    pub workspace_owner: Option<(u32, u32)>,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            image: "vibeterm-agent:latest".to_string(),
            data_dir: PathBuf::from("data"),
            agent_port: env::AGENT_PORT,
            memory_bytes: env::CONTAINER_MEMORY_BYTES,
            cpu_quota: None,
            settle: env::AGENT_SETTLE,
            max_sessions_per_user: env::MAX_SESSIONS_PER_USER,
            port_range: (env::PORT_RANGE_START, env::PORT_RANGE_END),
            workspace_owner: Some((env::WORKSPACE_UID, env::WORKSPACE_GID)),
        }
    }
}

/// Table and port set, guarded together by the manager lock.
pub(crate) struct ManagerState {
    pub(crate) table: HashMap<String, Arc<Session>>,
    pub(crate) ports: PortAllocator,
}

/// Central session manager.
pub struct SessionManager {
    config: SessionManagerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    owners: Arc<OwnerStore>,
    pub(crate) state: Mutex<ManagerState>,
    /// Serializes get_or_create/delete per session id so a slot is only ever
    /// worked on by one task.
    op_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    /// Serializes the quota check + insert per principal.
    creation_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl SessionManager {
    /// Create a manager over the given runtime and ownership store.
    pub fn new(
        config: SessionManagerConfig,
        runtime: Arc<dyn ContainerRuntime>,
        owners: Arc<OwnerStore>,
    ) -> Self {
        let ports = PortAllocator::new(config.port_range.0, config.port_range.1);
        Self {
            config,
            runtime,
            owners,
            state: Mutex::new(ManagerState {
                table: HashMap::new(),
                ports,
            }),
            op_locks: DashMap::new(),
            creation_locks: DashMap::new(),
        }
    }

    /// The manager configuration.
    pub fn config(&self) -> &SessionManagerConfig {
        &self.config
    }

    /// The ownership store backing this manager.
    pub fn owners(&self) -> &Arc<OwnerStore> {
        &self.owners
    }

    /// The container runtime backing this manager.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    fn op_lock(&self, sid: &str) -> Arc<AsyncMutex<()>> {
        self.op_locks
            .entry(sid.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn creation_lock(&self, principal: &str) -> Arc<AsyncMutex<()>> {
        self.creation_locks
            .entry(principal.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Look up a session without touching the runtime.
    pub fn get(&self, sid: &str) -> Option<Arc<Session>> {
        self.state.lock().unwrap().table.get(sid).cloned()
    }

    /// Snapshot every session.
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let state = self.state.lock().unwrap();
        let mut sessions: Vec<SessionSnapshot> =
            state.table.values().map(|s| s.snapshot()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Acquire a transport reference on a READY session.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotFound`] for unknown ids,
    /// [`SessionError::NotReady`] while the session is mid-create or
    /// mid-delete.
    pub fn acquire_ref(&self, sid: &str) -> Result<SessionRef> {
        let session = self.get(sid).ok_or(SessionError::NotFound)?;
        session
            .try_acquire_ref()
            .map_err(|_| SessionError::NotReady)?;
        Ok(SessionRef::new(session))
    }

    /// Create a brand-new session for `principal`, enforcing the quota.
    ///
    /// The quota check and the ownership insert run under a per-principal
    /// lock so two parallel requests cannot both pass the check. Different
    /// principals create in parallel.
    pub async fn create_for(&self, principal: &str) -> Result<Arc<Session>> {
        let lock = self.creation_lock(principal);
        let _guard = lock.lock().await;

        if self.owners.count_by(principal).await >= self.config.max_sessions_per_user {
            return Err(SessionError::QuotaExceeded);
        }

        let sid = new_session_id();
        self.owners.assign(&sid, principal).await?;

        match self.get_or_create(&sid).await {
            Ok(session) => Ok(session),
            Err(e) => {
                // get_or_create already dropped the row on failure, but only
                // best-effort; make sure the quota is not burned.
                if let Err(remove_err) = self.owners.remove(&sid).await {
                    warn!("Failed to drop ownership of failed session: {}", remove_err);
                }
                Err(e)
            }
        }
    }

    /// Return the live READY session for `sid`, spawning its container if it
    /// does not exist or its container died.
    pub async fn get_or_create(&self, sid: &str) -> Result<Arc<Session>> {
        if sid.is_empty() {
            return Err(SessionError::NotFound);
        }

        let lock = self.op_lock(sid);
        let _guard = lock.lock().await;

        // Fast path: existing READY session whose container still runs.
        if let Some(session) = self.get(sid) {
            if session.state() == SessionState::Ready {
                match self.runtime.inspect(&session.container_name).await {
                    Ok(inspection) if inspection.running => {
                        session.touch();
                        return Ok(session);
                    }
                    Ok(_) => {
                        debug!("Session {} container is not running; recreating", short_sid(sid));
                    }
                    Err(e) => {
                        debug!(
                            "Session {} container inspect failed ({}); recreating",
                            short_sid(sid),
                            e
                        );
                    }
                }
            }
        }

        // Slow path: reserve a slot under the manager lock, then spawn
        // unlocked.
        let (session, port) = {
            let mut state = self.state.lock().unwrap();
            if let Some(stale) = state.table.remove(sid) {
                state.ports.release(stale.host_port);
            }
            let port = state.ports.acquire()?;
            let workspace = env::workspace_path(&self.config.data_dir, sid);
            let session = Arc::new(Session::new(
                sid.to_string(),
                port,
                workspace,
                SessionState::Creating,
            ));
            state.table.insert(sid.to_string(), session.clone());
            (session, port)
        };

        match self.spawn_container(&session).await {
            Ok(()) => {
                session.set_state(SessionState::Ready);
                session.touch();
                info!(
                    "Session {} ready on port {} ({})",
                    short_sid(sid),
                    port,
                    session.container_name
                );
                Ok(session)
            }
            Err(e) => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.table.remove(sid);
                    state.ports.release(port);
                }
                if let Err(cleanup) = self.runtime.remove(&session.container_name, true).await {
                    if !matches!(cleanup, ContainerError::NotFound(_)) {
                        warn!("Failed to clean up container after create error: {}", cleanup);
                    }
                }
                if let Err(cleanup) = self.owners.remove(sid).await {
                    warn!("Failed to drop ownership after create error: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// Spawn the container for a freshly reserved session and wait for the
    /// agent to come up. Runs with no locks held.
    async fn spawn_container(&self, session: &Session) -> Result<()> {
        self.prepare_workspace(&session.workspace).await?;

        // A container with the derived name may survive from a crashed
        // lifecycle; clear it before creating.
        match self.runtime.remove(&session.container_name, true).await {
            Ok(()) => debug!("Removed prior container {}", session.container_name),
            Err(ContainerError::NotFound(_)) => {}
            Err(e) => warn!("Failed to remove prior container: {}", e),
        }

        let spec = SessionContainerSpec::builder()
            .image(&self.config.image)
            .workspace_host(&session.workspace)
            .agent_port(self.config.agent_port)
            .host_port(session.host_port)
            .memory_bytes(self.config.memory_bytes)
            .cpu_quota(self.config.cpu_quota)
            .build()?;

        self.runtime.create(&session.container_name, &spec).await?;
        self.runtime.start(&session.container_name).await?;

        // Give the agent a moment to bind its port, then verify the
        // container survived startup. The first failed check gets one retry
        // after another settle interval.
        tokio::time::sleep(self.config.settle).await;
        match self.runtime.inspect(&session.container_name).await {
            Ok(inspection) if inspection.running => return Ok(()),
            Ok(_) => debug!("Container {} not yet running; retrying once", session.container_name),
            Err(e) => debug!("Readiness inspect failed ({}); retrying once", e),
        }
        tokio::time::sleep(self.config.settle).await;
        let inspection = self.runtime.inspect(&session.container_name).await?;
        if inspection.running {
            Ok(())
        } else {
            Err(SessionError::Runtime(ContainerError::Other(format!(
                "container {} exited during startup",
                session.container_name
            ))))
        }
    }

    /// Create the workspace directory owned by the in-container user.
    async fn prepare_workspace(&self, workspace: &std::path::Path) -> Result<()> {
        tokio::fs::create_dir_all(workspace).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(workspace, std::fs::Permissions::from_mode(0o755)).await?;
            // The in-container user must own its workspace; a session whose
            // home is unwritable is broken, so this failure rolls the
            // creation back.
            if let Some((uid, gid)) = self.config.workspace_owner {
                std::os::unix::fs::chown(workspace, Some(uid), Some(gid)).map_err(|e| {
                    std::io::Error::new(
                        e.kind(),
                        format!("chown {} to {}:{}: {}", workspace.display(), uid, gid, e),
                    )
                })?;
            }
        }
        Ok(())
    }

    /// Tear down a session.
    ///
    /// Without `force`, refuses while transports hold references (returns
    /// `false`). Returns `false` for unknown ids, making repeated deletes
    /// idempotent. Container, workspace, and ownership removal are
    /// best-effort and never mask the decision.
    pub async fn delete(&self, sid: &str, force: bool) -> bool {
        let lock = self.op_lock(sid);
        let _guard = lock.lock().await;

        let session = {
            let mut state = self.state.lock().unwrap();
            let Some(session) = state.table.get(sid).cloned() else {
                return false;
            };
            if !session.try_begin_delete(force) {
                return false;
            }
            state.table.remove(sid);
            state.ports.release(session.host_port);
            session
        };

        info!(
            "Deleting session {} (force={}, container {})",
            short_sid(sid),
            force,
            session.container_name
        );

        if let Err(e) = self.runtime.remove(&session.container_name, true).await {
            if !matches!(e, ContainerError::NotFound(_)) {
                warn!("Failed to remove container {}: {}", session.container_name, e);
            }
        }
        if let Err(e) = tokio::fs::remove_dir_all(&session.workspace).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove workspace {}: {}",
                    session.workspace.display(),
                    e
                );
            }
        }
        if let Err(e) = self.owners.remove(sid).await {
            warn!("Failed to remove ownership row for {}: {}", short_sid(sid), e);
        }

        self.op_locks.remove(sid);
        true
    }
}

/// Loggable abbreviation of a session id.
pub(crate) fn short_sid(sid: &str) -> &str {
    sid.get(..env::CONTAINER_NAME_ID_LEN).unwrap_or(sid)
}
