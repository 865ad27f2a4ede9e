//! Startup recovery.
//!
//! Containers outlive the broker process (restart policy `unless-stopped`),
//! so on boot the manager walks the runtime for containers carrying the
//! session name prefix and reassociates them. The state of record is the
//! workspace bind mount on disk: the session id is its final path segment,
//! which keeps recovery robust to manual container recreation under the
//! same name.

use crate::container::{ContainerError, ContainerInspection, ContainerRuntime};
use crate::env;
use crate::session::SessionManager;
use crate::session::manager::short_sid;
use crate::session::model::{Session, SessionState};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl SessionManager {
    /// Reassociate surviving containers with sessions. Called once at
    /// startup, before the HTTP surface accepts requests; calling it again
    /// is a no-op for sessions already installed.
    pub async fn recover(&self) {
        let briefs = match self
            .runtime()
            .list_by_prefix(env::CONTAINER_NAME_PREFIX)
            .await
        {
            Ok(briefs) => briefs,
            Err(e) => {
                warn!("Recovery listing failed: {}", e);
                return;
            }
        };

        info!("Recovery found {} candidate container(s)", briefs.len());

        for brief in briefs {
            if let Err(e) = self.recover_one(&brief.name).await {
                warn!("Recovery of container {} failed: {}", brief.name, e);
            }
        }
    }

    /// Recover a single container by name, removing it when it cannot be
    /// turned back into a session.
    async fn recover_one(&self, name: &str) -> crate::session::Result<()> {
        let inspection = self.runtime().inspect(name).await?;

        let Some((sid, workspace)) = derive_session_workspace(&inspection) else {
            info!("Container {} has no usable workspace mount; removing", name);
            self.remove_hopeless(name).await;
            return Ok(());
        };

        // The name must match the id the workspace claims; a mismatch means
        // the container was recreated against a foreign workspace.
        if env::container_name_for_session(&sid) != name {
            info!(
                "Container {} does not match workspace session {}; removing",
                name,
                short_sid(&sid)
            );
            self.remove_hopeless(name).await;
            return Ok(());
        }

        if self.get(&sid).is_some() {
            debug!("Session {} already installed; skipping", short_sid(&sid));
            return Ok(());
        }

        let inspection = if inspection.running {
            inspection
        } else {
            // Try to revive a stopped container before giving up on it.
            match self.runtime().start(name).await {
                Ok(()) => {
                    tokio::time::sleep(self.config().settle).await;
                    match self.runtime().inspect(name).await {
                        Ok(again) if again.running => again,
                        Ok(_) | Err(ContainerError::NotFound(_)) => {
                            info!("Container {} would not stay up; removing", name);
                            self.remove_hopeless(name).await;
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => {
                    info!("Container {} failed to start ({}); removing", name, e);
                    self.remove_hopeless(name).await;
                    return Ok(());
                }
            }
        };

        let Some(port) = inspection.host_port else {
            info!("Container {} has no host port binding; removing", name);
            self.remove_hopeless(name).await;
            return Ok(());
        };

        let installed = {
            let mut state = self.state.lock().unwrap();
            if state.table.contains_key(&sid) {
                false
            } else {
                let session =
                    Arc::new(Session::new(sid.clone(), port, workspace, SessionState::Ready));
                state.table.insert(sid.clone(), session);
                state.ports.mark_allocated(port);
                true
            }
        };

        if installed {
            info!("Recovered session {} on port {}", short_sid(&sid), port);
        }
        Ok(())
    }

    async fn remove_hopeless(&self, name: &str) {
        if let Err(e) = self.runtime().remove(name, true).await {
            if !matches!(e, ContainerError::NotFound(_)) {
                warn!("Failed to remove unrecoverable container {}: {}", name, e);
            }
        }
    }
}

/// Derive the session id and workspace path from the workspace bind mount.
fn derive_session_workspace(
    inspection: &ContainerInspection,
) -> Option<(String, std::path::PathBuf)> {
    let path = inspection.workspace_host_path.as_ref()?;
    let sid = path.file_name()?.to_str()?;
    if sid.len() < env::CONTAINER_NAME_ID_LEN {
        return None;
    }
    Some((sid.to_string(), path.clone()))
}
