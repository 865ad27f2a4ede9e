//! Container runtime layer.
//!
//! Wraps the bollard Docker/Podman API behind the narrow [`ContainerRuntime`]
//! trait the session manager consumes: create/start/remove session
//! containers, inspect their state, and enumerate them by name prefix.
//!
//! - [`client`]: Docker/Podman API client wrapper with connection fallback
//! - [`config`]: session container specification builder
//! - [`runtime`]: the [`ContainerRuntime`] trait and its bollard implementation

mod client;
mod config;
#[cfg(test)]
pub(crate) mod fake;
mod runtime;

pub use client::ContainerClient;
pub use config::{SessionContainerSpec, SessionContainerSpecBuilder};
pub use runtime::{ContainerBrief, ContainerInspection, ContainerRuntime, DockerRuntime};

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Docker/Podman API error
    #[error("Container API error: {0}")]
    ApiError(#[from] bollard::errors::Error),

    /// Container not found
    #[error("Container not found: {0}")]
    NotFound(String),

    /// Container configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// General error
    #[error("Container error: {0}")]
    Other(String),
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
