//! Command-line arguments and broker configuration.

use crate::env;
use crate::session::SessionManagerConfig;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default auth config probed in the working directory when none is given.
const DEFAULT_AUTH_CONFIG: &str = "auth.toml";

/// Web terminal broker: one persistent sandbox container per user session.
#[derive(Debug, Parser)]
#[command(name = "vibeterm", version, about)]
pub struct Args {
    /// Address to listen on. Must be a loopback address unless
    /// authentication is configured.
    #[arg(long, env = "VIBETERM_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Agent image spawned for every session.
    #[arg(long, env = "VIBETERM_IMAGE", default_value = "vibeterm-agent:latest")]
    pub image: String,

    /// Data directory holding the ownership map and session workspaces.
    #[arg(long, env = "VIBETERM_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Credential table (TOML). Defaults to ./auth.toml when present;
    /// without one, authentication is disabled and the broker is
    /// loopback-only.
    #[arg(long, env = "VIBETERM_AUTH_CONFIG")]
    pub auth_config: Option<PathBuf>,

    /// CPU quota per 100ms period in microseconds (100000 = one CPU).
    /// Containers are CPU-unlimited unless set.
    #[arg(long, env = "VIBETERM_CPU_QUOTA")]
    pub cpu_quota: Option<i64>,

    /// Drop the Secure cookie attribute. Test harnesses only.
    #[arg(long, hide = true)]
    pub insecure_cookies: bool,
}

impl Args {
    /// The auth config to load: the explicit flag, or `./auth.toml` when it
    /// exists.
    pub fn resolve_auth_config(&self) -> Option<PathBuf> {
        if let Some(path) = &self.auth_config {
            return Some(path.clone());
        }
        let default = PathBuf::from(DEFAULT_AUTH_CONFIG);
        default.is_file().then_some(default)
    }

    /// Session manager configuration derived from the arguments.
    pub fn manager_config(&self) -> SessionManagerConfig {
        SessionManagerConfig {
            image: self.image.clone(),
            data_dir: self.data_dir.clone(),
            cpu_quota: self.cpu_quota,
            agent_port: env::AGENT_PORT,
            memory_bytes: env::CONTAINER_MEMORY_BYTES,
            settle: env::AGENT_SETTLE,
            max_sessions_per_user: env::MAX_SESSIONS_PER_USER,
            port_range: (env::PORT_RANGE_START, env::PORT_RANGE_END),
            workspace_owner: Some((env::WORKSPACE_UID, env::WORKSPACE_GID)),
        }
    }
}
