//! Background reconciliation.
//!
//! One task, three independently scheduled sweeps: session drift against the
//! container runtime, expired login sessions, and stale polling transports.
//! Every sweep logs and swallows its own failures so one bad pass never
//! stops the next.

use crate::auth::Authenticator;
use crate::container::{ContainerError, ContainerRuntime};
use crate::env;
use crate::owners::OwnerStore;
use crate::session::{SessionManager, SessionState};
use crate::transport::PollingStation;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Periodic drift repair between the broker's model and the world.
pub struct Reconciler {
    manager: Arc<SessionManager>,
    polling: Arc<PollingStation>,
    auth: Arc<dyn Authenticator>,
}

impl Reconciler {
    /// Create a reconciler over the given subsystems.
    pub fn new(
        manager: Arc<SessionManager>,
        polling: Arc<PollingStation>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            manager,
            polling,
            auth,
        }
    }

    /// Spawn the background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        let mut drift = tokio::time::interval(env::DRIFT_SWEEP_INTERVAL);
        let mut purge = tokio::time::interval(env::AUTH_PURGE_INTERVAL);
        let mut reap = tokio::time::interval(env::POLL_REAP_INTERVAL);

        // Intervals fire immediately once; consume those so the first real
        // sweep happens one period after startup recovery.
        drift.tick().await;
        purge.tick().await;
        reap.tick().await;

        info!("Reconciler running");
        loop {
            tokio::select! {
                _ = drift.tick() => {
                    self.sweep_sessions().await;
                    self.prune_ownership().await;
                }
                _ = purge.tick() => {
                    let purged = self.auth.purge_expired();
                    if purged > 0 {
                        info!("Purged {} expired login session(s)", purged);
                    }
                }
                _ = reap.tick() => {
                    self.polling.reap();
                }
            }
        }
    }

    /// Restart dead containers behind READY sessions; sessions whose
    /// container cannot be revived are force-deleted, dropping ownership.
    pub async fn sweep_sessions(&self) {
        for snapshot in self.manager.list() {
            if snapshot.state != SessionState::Ready {
                continue;
            }

            match self.manager.runtime().inspect(&snapshot.container_name).await {
                Ok(inspection) if inspection.running => {}
                Ok(_) => {
                    info!(
                        "Container {} is down; attempting restart",
                        snapshot.container_name
                    );
                    if let Err(e) = self.manager.runtime().start(&snapshot.container_name).await {
                        warn!(
                            "Restart of {} failed ({}); deleting session",
                            snapshot.container_name, e
                        );
                        self.polling.discard(&snapshot.id);
                        self.manager.delete(&snapshot.id, true).await;
                    }
                }
                Err(ContainerError::NotFound(_)) => {
                    warn!(
                        "Container {} vanished; deleting session",
                        snapshot.container_name
                    );
                    self.polling.discard(&snapshot.id);
                    self.manager.delete(&snapshot.id, true).await;
                }
                Err(e) => {
                    // Transient runtime trouble; try again next sweep.
                    debug!("Inspect of {} failed: {}", snapshot.container_name, e);
                }
            }
        }
    }

    /// Drop ownership rows whose session is gone, but only once the runtime
    /// confirms no container backs them. A row whose container still exists
    /// is mid-recovery and gets picked up by the next recovery pass.
    pub async fn prune_ownership(&self) {
        let owners: &Arc<OwnerStore> = self.manager.owners();
        for sid in owners.all_sids().await {
            if self.manager.get(&sid).is_some() {
                continue;
            }
            let name = env::container_name_for_session(&sid);
            match self.manager.runtime().inspect(&name).await {
                Err(ContainerError::NotFound(_)) => {
                    info!("Pruning orphan ownership row (no container backs it)");
                    if let Err(e) = owners.remove(&sid).await {
                        warn!("Orphan prune failed: {}", e);
                    }
                }
                Ok(_) => {
                    debug!("Ownership row for {} kept; container still exists", name);
                }
                Err(e) => {
                    debug!("Inspect of {} failed: {}", name, e);
                }
            }
        }
    }
}
