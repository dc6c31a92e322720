//! Error types for ephemeral service sessions.

use std::time::Duration;

use thiserror::Error;

/// Result type for session setup.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Fatal errors that abort a session before an endpoint is handed out.
///
/// Any container allocated before the failure has already been killed and
/// removed by the time one of these reaches the caller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Docker is not available.
    #[error("Docker not available: {reason}")]
    DockerNotAvailable {
        /// Reason why Docker is unavailable.
        reason: String,
    },

    /// Failed to pull the image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed {
        /// Image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// No free loopback port could be reserved.
    #[error("Failed to reserve a local port: {0}")]
    PortAllocation(#[source] std::io::Error),

    /// Failed to create the container.
    #[error("Failed to create container '{name}': {reason}")]
    ContainerCreationFailed {
        /// Container name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to start the container.
    #[error("Failed to start container '{name}': {reason}")]
    ContainerStartFailed {
        /// Container name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Container exited while waiting for readiness.
    #[error("Container '{name}' exited before becoming ready")]
    ContainerExited {
        /// Container name.
        name: String,
    },

    /// Service never completed a protocol handshake within the timeout.
    #[error("Failed to start {image} in {timeout:?}")]
    ReadinessTimeout {
        /// Image reference.
        image: String,
        /// Configured readiness timeout.
        timeout: Duration,
    },

    /// Failed to build the runtime backing the blocking API.
    #[error("Failed to build async runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors reported by a [`ContainerRuntime`](crate::runtime::ContainerRuntime).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The container (or image) does not exist.
    #[error("'{id}' not found")]
    NotFound { id: String },

    /// Any other runtime API failure.
    #[error("{reason}")]
    Api { reason: String },
}

impl RuntimeError {
    pub fn api(reason: impl Into<String>) -> Self {
        Self::Api {
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
