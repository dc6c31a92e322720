//! Container runtime boundary.
//!
//! The lifecycle manager only needs six operations from a container runtime.
//! [`DockerRuntime`] provides them over the Docker Engine API; tests swap in
//! [`RecordingRuntime`](crate::testing::RecordingRuntime).

mod detect;
mod docker;

use async_trait::async_trait;

pub use detect::{DockerStatus, check_docker};
pub use docker::{DockerRuntime, MANAGED_LABEL, connect_docker};

use crate::error::RuntimeError;

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    /// Image reference, e.g. `postgres:16`.
    pub image: String,
    /// Unique container name.
    pub name: String,
    /// Port the service listens on inside the container.
    pub container_port: u16,
    /// Host address the port is published on.
    pub host_ip: String,
    /// Host port the container port is published on.
    pub host_port: u16,
    /// Environment variables: (name, value).
    pub env: Vec<(String, String)>,
    /// Command override; `None` keeps the image default.
    pub command: Option<Vec<String>>,
    /// Paths mounted as tmpfs inside the container.
    pub tmpfs: Vec<String>,
}

impl ContainerRequest {
    /// Docker port key for the exposed port (`5432/tcp`).
    pub fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }

    /// Environment in `NAME=value` form.
    pub fn env_strings(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Operations the lifecycle manager performs against a container runtime.
///
/// Containers are always created detached. Implementations return
/// [`RuntimeError::NotFound`] when the target no longer exists so cleanup
/// can treat it as already done.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image by reference.
    async fn pull(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a container and return its id.
    async fn create_container(&self, request: &ContainerRequest) -> Result<String, RuntimeError>;

    /// Start a created container.
    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Whether the container is still running.
    async fn is_running(&self, id: &str) -> Result<bool, RuntimeError>;

    /// Kill a running container.
    async fn kill(&self, id: &str) -> Result<(), RuntimeError>;

    /// Remove a container, optionally with its anonymous volumes.
    async fn remove(&self, id: &str, remove_volumes: bool) -> Result<(), RuntimeError>;
}
