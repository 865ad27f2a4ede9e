//! The container runtime seam.
//!
//! [`ContainerRuntime`] is the narrow surface the session manager and the
//! reconciler consume; [`DockerRuntime`] implements it over bollard. Keeping
//! the trait small makes drift reconciliation testable without a daemon.

use crate::container::{ContainerClient, ContainerError, Result, SessionContainerSpec};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// State of one container as the runtime reports it.
#[derive(Debug, Clone)]
pub struct ContainerInspection {
    /// Runtime container id
    pub id: String,
    /// Whether the main process is currently running
    pub running: bool,
    /// Host path of the workspace bind mount, if one is configured
    pub workspace_host_path: Option<PathBuf>,
    /// Host port bound onto the agent port, if one is configured
    pub host_port: Option<u16>,
}

/// One row of a prefix listing.
#[derive(Debug, Clone)]
pub struct ContainerBrief {
    /// Runtime container id
    pub id: String,
    /// Container name without the leading slash
    pub name: String,
    /// Runtime state string, e.g. `running` or `exited`
    pub state: String,
}

impl ContainerBrief {
    /// Whether the listing reports the container as running.
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }
}

/// Operations the broker needs from the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a named session container. Returns the container id.
    async fn create(&self, name: &str, spec: &SessionContainerSpec) -> Result<String>;

    /// Start a container by name or id.
    async fn start(&self, name_or_id: &str) -> Result<()>;

    /// Remove a container by name or id.
    async fn remove(&self, name_or_id: &str, force: bool) -> Result<()>;

    /// Inspect a container by name or id.
    async fn inspect(&self, name_or_id: &str) -> Result<ContainerInspection>;

    /// List all containers (including stopped) whose name starts with
    /// `prefix`.
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ContainerBrief>>;
}

/// Bollard-backed [`ContainerRuntime`].
#[derive(Clone)]
pub struct DockerRuntime {
    client: ContainerClient,
}

impl DockerRuntime {
    /// Wrap an existing client connection.
    pub fn new(client: ContainerClient) -> Self {
        Self { client }
    }
}

fn map_not_found(name: &str, e: bollard::errors::Error) -> ContainerError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => ContainerError::NotFound(name.to_string()),
        e => ContainerError::ApiError(e),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, name: &str, spec: &SessionContainerSpec) -> Result<String> {
        let options = bollard::container::CreateContainerOptions {
            name,
            ..Default::default()
        };

        debug!("Creating container: {}", name);

        let response = self
            .client
            .docker()
            .create_container(Some(options), spec.to_bollard_config())
            .await?;

        info!("Created container: {} ({})", name, response.id);
        Ok(response.id)
    }

    async fn start(&self, name_or_id: &str) -> Result<()> {
        debug!("Starting container: {}", name_or_id);

        self.client
            .docker()
            .start_container(
                name_or_id,
                None::<bollard::container::StartContainerOptions<String>>,
            )
            .await
            .map_err(|e| map_not_found(name_or_id, e))?;

        info!("Started container: {}", name_or_id);
        Ok(())
    }

    async fn remove(&self, name_or_id: &str, force: bool) -> Result<()> {
        debug!("Removing container: {}", name_or_id);

        self.client
            .docker()
            .remove_container(
                name_or_id,
                Some(bollard::container::RemoveContainerOptions {
                    force,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_not_found(name_or_id, e))?;

        info!("Removed container: {}", name_or_id);
        Ok(())
    }

    async fn inspect(&self, name_or_id: &str) -> Result<ContainerInspection> {
        let response = self
            .client
            .docker()
            .inspect_container(
                name_or_id,
                None::<bollard::query_parameters::InspectContainerOptions>,
            )
            .await
            .map_err(|e| map_not_found(name_or_id, e))?;

        let id = response
            .id
            .ok_or_else(|| ContainerError::Other(format!("Container {} has no id", name_or_id)))?;

        let running = response
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);

        let host_config = response.host_config;

        // The workspace bind is the single "host:container" entry we created
        // the container with.
        let workspace_host_path = host_config
            .as_ref()
            .and_then(|hc| hc.binds.as_ref())
            .and_then(|binds| binds.first())
            .and_then(|bind| bind.split(':').next())
            .map(PathBuf::from);

        let host_port = host_config
            .as_ref()
            .and_then(|hc| hc.port_bindings.as_ref())
            .and_then(first_host_port);

        Ok(ContainerInspection {
            id,
            running,
            workspace_host_path,
            host_port,
        })
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<ContainerBrief>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![prefix.to_string()]);

        let containers = self
            .client
            .docker()
            .list_containers(Some(bollard::container::ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let name = c
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|n| n.trim_start_matches('/').to_string())?;
                // The daemon's name filter is a substring match; keep strict
                // prefixes only.
                if !name.starts_with(prefix) {
                    return None;
                }
                Some(ContainerBrief {
                    id: c.id.unwrap_or_default(),
                    name,
                    state: c.state.map(|s| s.to_string()).unwrap_or_default(),
                })
            })
            .collect())
    }
}

fn first_host_port(
    bindings: &HashMap<String, Option<Vec<bollard::service::PortBinding>>>,
) -> Option<u16> {
    bindings
        .values()
        .flatten()
        .flat_map(|v| v.iter())
        .find_map(|b| b.host_port.as_deref().and_then(|p| p.parse().ok()))
}
