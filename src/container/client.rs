//! Container daemon connection.
//!
//! One bollard client is shared by every runtime operation in the broker.
//! The default daemon socket is tried first, then the Podman sockets, since
//! session containers work the same on either.

use crate::container::{ContainerError, Result};
use bollard::Docker;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared handle to the container daemon.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
}

impl ContainerClient {
    /// Connect to a container daemon and verify it answers.
    ///
    /// # Errors
    ///
    /// Returns error when no daemon is reachable over any known socket.
    pub async fn new() -> Result<Self> {
        let docker = Self::connect().await?;
        let client = Self {
            docker: Arc::new(docker),
        };
        client.ping().await?;
        Ok(client)
    }

    async fn connect() -> Result<Docker> {
        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Container daemon reached over the default socket");
                return Ok(docker);
            }
            Err(e) => debug!("Default daemon socket unavailable: {}", e),
        }

        #[cfg(unix)]
        for socket in podman_sockets() {
            match Docker::connect_with_socket(&socket, 120, bollard::API_DEFAULT_VERSION) {
                Ok(docker) => {
                    info!("Container daemon reached at {}", socket);
                    return Ok(docker);
                }
                Err(e) => debug!("Podman socket {} unavailable: {}", socket, e),
            }
        }

        Err(ContainerError::Other(
            "no container daemon reachable; the broker needs Docker or Podman to spawn session containers".to_string(),
        ))
    }

    /// Round-trip to the daemon.
    ///
    /// # Errors
    ///
    /// Returns error if the daemon does not answer.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| ContainerError::Other(format!("container daemon unresponsive: {}", e)))?;
        Ok(())
    }

    /// Get the underlying Docker client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

/// Rootless socket first, system socket second.
#[cfg(unix)]
fn podman_sockets() -> Vec<String> {
    let mut sockets = Vec::new();
    if let Ok(home) = std::env::var("HOME") {
        sockets.push(format!("unix://{home}/run/podman/podman.sock"));
    }
    sockets.push("unix:///run/podman/podman.sock".to_string());
    sockets
}
