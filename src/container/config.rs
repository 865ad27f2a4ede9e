//! Session container specification.
//!
//! Builds the fixed container shape every terminal session uses: the agent
//! image, the workspace bind mount, a single loopback port binding onto the
//! agent port, a host-gateway alias, a memory cap, and the `unless-stopped`
//! restart policy that lets containers outlive broker and host restarts.

use crate::container::{ContainerError, Result};
use bollard::service::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use std::collections::HashMap;
use std::path::PathBuf;

/// Home directory of the terminal user inside the container, where the
/// session workspace is mounted.
pub const CONTAINER_HOME: &str = "/home/user";

/// Specification for one session container.
#[derive(Debug, Clone)]
pub struct SessionContainerSpec {
    /// Agent image name
    pub image: String,
    /// Host directory mounted as the in-container home workspace
    pub workspace_host: PathBuf,
    /// Port the agent listens on inside the container
    pub agent_port: u16,
    /// Host loopback port bound onto the agent port
    pub host_port: u16,
    /// Memory cap in bytes
    pub memory_bytes: i64,
    /// CPU quota in microseconds per 100ms period; None leaves CPU unlimited
    pub cpu_quota: Option<i64>,
}

impl SessionContainerSpec {
    /// Create a new specification builder.
    pub fn builder() -> SessionContainerSpecBuilder {
        SessionContainerSpecBuilder::default()
    }

    /// Render the bollard creation config for this spec.
    pub fn to_bollard_config(&self) -> bollard::container::Config<String> {
        let exposed = format!("{}/tcp", self.agent_port);

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        port_bindings.insert(
            exposed.clone(),
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(self.host_port.to_string()),
            }]),
        );

        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}",
                self.workspace_host.display(),
                CONTAINER_HOME
            )]),
            port_bindings: Some(port_bindings),
            extra_hosts: Some(vec!["host.docker.internal:host-gateway".to_string()]),
            memory: Some(self.memory_bytes),
            cpu_quota: self.cpu_quota,
            cpu_period: self.cpu_quota.map(|_| 100_000),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(exposed, HashMap::new());

        bollard::container::Config {
            image: Some(self.image.clone()),
            env: Some(vec!["TERM=xterm-256color".to_string()]),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// Fluent builder for [`SessionContainerSpec`].
#[derive(Debug, Default)]
pub struct SessionContainerSpecBuilder {
    image: Option<String>,
    workspace_host: Option<PathBuf>,
    agent_port: Option<u16>,
    host_port: Option<u16>,
    memory_bytes: Option<i64>,
    cpu_quota: Option<i64>,
}

impl SessionContainerSpecBuilder {
    /// Set the agent image.
    pub fn image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the host workspace directory to mount.
    pub fn workspace_host<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.workspace_host = Some(path.into());
        self
    }

    /// Set the in-container agent port.
    pub fn agent_port(mut self, port: u16) -> Self {
        self.agent_port = Some(port);
        self
    }

    /// Set the host loopback port.
    pub fn host_port(mut self, port: u16) -> Self {
        self.host_port = Some(port);
        self
    }

    /// Set the memory cap in bytes.
    pub fn memory_bytes(mut self, bytes: i64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }

    /// Cap the container at `quota` CPU-microseconds per 100ms period.
    /// Containers are CPU-unlimited unless the operator opts in.
    pub fn cpu_quota(mut self, quota: Option<i64>) -> Self {
        self.cpu_quota = quota;
        self
    }

    /// Build the specification.
    ///
    /// # Errors
    ///
    /// Returns error if required fields are missing.
    pub fn build(self) -> Result<SessionContainerSpec> {
        let image = self
            .image
            .ok_or_else(|| ContainerError::ConfigError("Image is required".to_string()))?;
        let workspace_host = self
            .workspace_host
            .ok_or_else(|| ContainerError::ConfigError("Workspace path is required".to_string()))?;
        let agent_port = self
            .agent_port
            .unwrap_or(crate::env::AGENT_PORT);
        let host_port = self
            .host_port
            .ok_or_else(|| ContainerError::ConfigError("Host port is required".to_string()))?;
        let memory_bytes = self
            .memory_bytes
            .unwrap_or(crate::env::CONTAINER_MEMORY_BYTES);

        Ok(SessionContainerSpec {
            image,
            workspace_host,
            agent_port,
            host_port,
            memory_bytes,
            cpu_quota: self.cpu_quota,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SessionContainerSpec {
        SessionContainerSpec::builder()
            .image("vibeterm-agent:latest")
            .workspace_host("/data/workspaces/sid1")
            .host_port(17003)
            .build()
            .unwrap()
    }

    #[test]
    fn test_port_binding_is_loopback_only() {
        let config = spec().to_bollard_config();
        let host = config.host_config.unwrap();
        let bindings = host.port_bindings.unwrap();
        let agent_key = format!("{}/tcp", crate::env::AGENT_PORT);

        let binding = &bindings[&agent_key].as_ref().unwrap()[0];
        assert_eq!(binding.host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(binding.host_port.as_deref(), Some("17003"));
    }

    #[test]
    fn test_workspace_bind_targets_home() {
        let config = spec().to_bollard_config();
        let binds = config.host_config.unwrap().binds.unwrap();
        assert_eq!(binds, vec!["/data/workspaces/sid1:/home/user"]);
    }

    #[test]
    fn test_restart_policy_and_memory() {
        let config = spec().to_bollard_config();
        let host = config.host_config.unwrap();
        assert_eq!(
            host.restart_policy.unwrap().name,
            Some(RestartPolicyNameEnum::UNLESS_STOPPED)
        );
        assert_eq!(host.memory, Some(crate::env::CONTAINER_MEMORY_BYTES));
    }

    #[test]
    fn test_cpu_unlimited_by_default() {
        let config = spec().to_bollard_config();
        let host = config.host_config.unwrap();
        assert_eq!(host.cpu_quota, None);
        assert_eq!(host.cpu_period, None);
    }

    #[test]
    fn test_cpu_quota_opt_in() {
        let spec = SessionContainerSpec::builder()
            .image("vibeterm-agent:latest")
            .workspace_host("/data/workspaces/sid1")
            .host_port(17003)
            .cpu_quota(Some(100_000))
            .build()
            .unwrap();
        let host = spec.to_bollard_config().host_config.unwrap();
        assert_eq!(host.cpu_quota, Some(100_000));
        assert_eq!(host.cpu_period, Some(100_000));
    }

    #[test]
    fn test_missing_image_error() {
        let result = SessionContainerSpec::builder()
            .workspace_host("/tmp/w")
            .host_port(17000)
            .build();
        assert!(matches!(result, Err(ContainerError::ConfigError(_))));
    }
}
