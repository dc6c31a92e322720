//! Docker implementation of the container runtime.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;

use crate::error::{RuntimeError, SessionError};
use crate::runtime::detect;
use crate::runtime::{ContainerRequest, ContainerRuntime};

/// Label attached to every container this crate creates.
pub const MANAGED_LABEL: &str = "ephemeral-pg.managed";

/// Connect to the Docker daemon.
///
/// Tries bollard's local defaults (which honour `DOCKER_HOST`) first, then
/// the rootless and Docker Desktop socket locations. Every candidate must
/// answer a ping.
pub async fn connect_docker() -> Result<Docker, RuntimeError> {
    if let Ok(docker) = Docker::connect_with_local_defaults()
        && docker.ping().await.is_ok()
    {
        return Ok(docker);
    }

    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let path = socket.to_string_lossy();
        if let Ok(docker) =
            Docker::connect_with_socket(&path, 120, bollard::API_DEFAULT_VERSION)
            && docker.ping().await.is_ok()
        {
            tracing::debug!("Connected to Docker via {}", path);
            return Ok(docker);
        }
    }

    Err(RuntimeError::api("Docker daemon did not respond to ping"))
}

fn fallback_sockets() -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        sockets.push(PathBuf::from(runtime_dir).join("docker.sock"));
    }
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker").join("run").join("docker.sock"));
    }
    sockets
}

/// Split an image reference into repository and tag, defaulting to `latest`.
///
/// Pulling a bare repository through the API would fetch every tag.
fn split_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn map_err(id: &str, e: bollard::errors::Error) -> RuntimeError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound { id: id.to_string() },
        other => RuntimeError::api(other.to_string()),
    }
}

/// [`ContainerRuntime`] backed by the Docker Engine API.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Wrap an existing client.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect to the local daemon, with an install/start hint on failure.
    pub async fn connect() -> Result<Self, SessionError> {
        match connect_docker().await {
            Ok(docker) => Ok(Self::new(docker)),
            Err(e) => {
                let status = detect::diagnose_unreachable();
                let mut reason = format!("{e} (docker {status})");
                if let Some(remedy) = status.remedy() {
                    reason.push_str(": ");
                    reason.push_str(remedy);
                }
                Err(SessionError::DockerNotAvailable { reason })
            }
        }
    }

    /// The underlying bollard client.
    pub fn client(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        let (from_image, tag) = split_image_ref(image);
        let options = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| map_err(image, e))?;
            if let Some(status) = info.status {
                tracing::trace!("Pull status: {}", status);
            }
        }
        Ok(())
    }

    async fn create_container(&self, request: &ContainerRequest) -> Result<String, RuntimeError> {
        let port_key = request.port_key();

        let port_bindings = HashMap::from([(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some(request.host_ip.clone()),
                host_port: Some(request.host_port.to_string()),
            }]),
        )]);

        // bollard expects HashMap<String, HashMap<(), ()>>
        let exposed_ports: HashMap<String, HashMap<(), ()>> =
            HashMap::from([(port_key, HashMap::new())]);

        let tmpfs: HashMap<String, String> = request
            .tmpfs
            .iter()
            .map(|path| (path.clone(), String::new()))
            .collect();

        let env = request.env_strings();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            tmpfs: if tmpfs.is_empty() { None } else { Some(tmpfs) },
            // Removal is explicit so cleanup can report what happened
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(request.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            cmd: request.command.clone(),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(HashMap::from([(
                MANAGED_LABEL.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: request.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| map_err(&request.name, e))?;

        for warning in &response.warnings {
            tracing::warn!("Docker warning for {}: {}", request.name, warning);
        }

        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_err(id, e))
    }

    async fn is_running(&self, id: &str) -> Result<bool, RuntimeError> {
        let info = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| map_err(id, e))?;
        Ok(info.state.and_then(|s| s.running).unwrap_or(false))
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| map_err(id, e))
    }

    async fn remove(&self, id: &str, remove_volumes: bool) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    v: remove_volumes,
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_err(id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_image_ref() {
        assert_eq!(split_image_ref("postgres"), ("postgres", "latest"));
        assert_eq!(split_image_ref("postgres:14"), ("postgres", "14"));
        assert_eq!(
            split_image_ref("localhost:5000/postgres"),
            ("localhost:5000/postgres", "latest")
        );
        assert_eq!(
            split_image_ref("localhost:5000/postgis/postgis:16-3.4"),
            ("localhost:5000/postgis/postgis", "16-3.4")
        );
        assert_eq!(
            split_image_ref("postgres@sha256:abc"),
            ("postgres@sha256:abc", "")
        );
    }

    #[test]
    fn test_not_found_mapping() {
        let err = map_err(
            "abc",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message: "No such container: abc".to_string(),
            },
        );
        assert!(err.is_not_found());

        let err = map_err(
            "abc",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 409,
                message: "is not running".to_string(),
            },
        );
        assert!(!err.is_not_found());
    }
}
