//! Session lifecycle: pull, reserve port, create, start, wait, clean up.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::error::{Result, SessionError};
use crate::lifecycle::backoff::Backoff;
use crate::lifecycle::port::reserve_port;
use crate::lifecycle::spec::{PostgresVersion, ServiceEndpoint, ServiceInstanceSpec};
use crate::probe::{Prober, ReadinessProbe};
use crate::runtime::{ContainerRequest, ContainerRuntime, DockerRuntime};

/// A container this crate created and must remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerHandle {
    pub(crate) id: String,
    pub(crate) name: String,
}

/// A ready service and the container behind it.
#[derive(Debug)]
pub(crate) struct ServiceSession {
    pub(crate) endpoint: ServiceEndpoint,
    pub(crate) handle: ContainerHandle,
}

/// Kill then remove a container, logging instead of failing.
///
/// Runs after setup errors too, so nothing here may replace the error that
/// triggered it.
pub(crate) async fn cleanup_container(runtime: &dyn ContainerRuntime, handle: &ContainerHandle) {
    tracing::info!("Removing container: {}", handle.name);

    // Already exited containers answer 409; removal below is forced anyway.
    if let Err(e) = runtime.kill(&handle.id).await {
        tracing::debug!("Kill of {} failed: {}", handle.name, e);
    }

    match runtime.remove(&handle.id, true).await {
        Ok(()) => tracing::info!("Removed container: {}", handle.name),
        Err(e) if e.is_not_found() => {
            tracing::debug!("Container {} was already removed", handle.name)
        }
        Err(e) => tracing::warn!("Failed to remove container {}: {}", handle.name, e),
    }
}

/// Owns a started container until it is cleaned up or handed to a session.
///
/// If dropped while still armed (the session future was cancelled), cleanup
/// runs to completion before `drop` returns, on a private runtime in a scoped
/// thread. The caller's runtime may already be shutting down at that point.
struct CleanupGuard {
    runtime: Arc<dyn ContainerRuntime>,
    handle: Option<ContainerHandle>,
}

impl CleanupGuard {
    fn new(runtime: Arc<dyn ContainerRuntime>, handle: ContainerHandle) -> Self {
        Self {
            runtime,
            handle: Some(handle),
        }
    }

    async fn cleanup(mut self) {
        if let Some(handle) = self.handle.take() {
            cleanup_container(self.runtime.as_ref(), &handle).await;
        }
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        tracing::warn!("Session for {} cancelled, removing container", handle.name);

        let runtime = self.runtime.as_ref();
        let handle = &handle;
        std::thread::scope(|s| {
            let joined = s
                .spawn(move || {
                    match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt.block_on(cleanup_container(runtime, handle)),
                        Err(e) => tracing::warn!(
                            "No runtime to clean up {}, container may remain: {}",
                            handle.name,
                            e
                        ),
                    }
                })
                .join();
            if joined.is_err() {
                tracing::warn!("Cleanup thread for {} panicked", handle.name);
            }
        });
    }
}

/// Starts ephemeral service containers and guarantees their removal.
///
/// Holds no per-session state: every call creates its own container, name and
/// host port, so one manager can serve concurrent sessions.
pub struct LifecycleManager {
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn ReadinessProbe>,
    config: HarnessConfig,
}

impl LifecycleManager {
    /// Create a manager from explicit collaborators.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn ReadinessProbe>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            runtime,
            probe,
            config,
        }
    }

    /// Connect to the local Docker daemon and pick the readiness probe.
    pub async fn connect(config: HarnessConfig) -> Result<Self> {
        let runtime = DockerRuntime::connect().await?;
        let probe = Prober::detect(&config);
        Ok(Self::new(Arc::new(runtime), Arc::new(probe), config))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub(crate) fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub(crate) fn probe(&self) -> &Arc<dyn ReadinessProbe> {
        &self.probe
    }

    /// Run `f` against a ready instance of `spec`, then remove the container.
    ///
    /// Cleanup happens after `f` completes or panics; a panic is resumed once
    /// the container is gone. Setup failures are returned after cleanup.
    pub async fn scoped<F, Fut, T>(&self, spec: &ServiceInstanceSpec, f: F) -> Result<T>
    where
        F: FnOnce(ServiceEndpoint) -> Fut,
        Fut: Future<Output = T>,
    {
        let session = self.start(spec).await?;
        let guard = CleanupGuard::new(Arc::clone(&self.runtime), session.handle);

        let endpoint = session.endpoint;
        let outcome = AssertUnwindSafe(async move { f(endpoint).await })
            .catch_unwind()
            .await;

        guard.cleanup().await;

        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// [`scoped`](Self::scoped) for a PostgreSQL variant built from this
    /// manager's configuration.
    pub async fn postgres<F, Fut, T>(&self, version: PostgresVersion, f: F) -> Result<T>
    where
        F: FnOnce(ServiceEndpoint) -> Fut,
        Fut: Future<Output = T>,
    {
        let spec = ServiceInstanceSpec::postgres(version, &self.config);
        self.scoped(&spec, f).await
    }

    /// Bring up a ready instance. The caller owns cleanup of the returned
    /// session; on error nothing is left behind.
    pub(crate) async fn start(&self, spec: &ServiceInstanceSpec) -> Result<ServiceSession> {
        tracing::info!("Pulling image: {}", spec.image);
        self.runtime
            .pull(&spec.image)
            .await
            .map_err(|e| SessionError::ImagePullFailed {
                image: spec.image.clone(),
                reason: e.to_string(),
            })?;

        let reservation = reserve_port(&self.config.host).map_err(SessionError::PortAllocation)?;
        let name = format!("{}-{}", self.config.name_prefix, Uuid::new_v4());

        let request = ContainerRequest {
            image: spec.image.clone(),
            name: name.clone(),
            container_port: spec.internal_port,
            host_ip: self.config.host.clone(),
            host_port: reservation.port(),
            env: spec.env.clone(),
            command: spec.command.clone(),
            tmpfs: spec.tmpfs.clone(),
        };
        let host_port = reservation.release();

        let id = match self.runtime.create_container(&request).await {
            Ok(id) => id,
            Err(e) => {
                // The daemon may have registered the name before failing.
                if let Err(remove_err) = self.runtime.remove(&name, true).await
                    && !remove_err.is_not_found()
                {
                    tracing::warn!("Failed to remove partial container {}: {}", name, remove_err);
                }
                return Err(SessionError::ContainerCreationFailed {
                    name,
                    reason: e.to_string(),
                });
            }
        };

        let handle = ContainerHandle { id, name };
        let guard = CleanupGuard::new(Arc::clone(&self.runtime), handle.clone());

        if let Err(e) = self.runtime.start(&handle.id).await {
            guard.cleanup().await;
            return Err(SessionError::ContainerStartFailed {
                name: handle.name,
                reason: e.to_string(),
            });
        }

        tracing::info!(
            "Started container {} ({}) on {}:{}",
            handle.name,
            spec.image,
            self.config.host,
            host_port
        );

        let endpoint = ServiceEndpoint {
            host: self.config.host.clone(),
            port: host_port,
            user: self.config.user.clone(),
            password: self.config.password.clone(),
            database: self.config.database.clone(),
        };

        if let Err(e) = self.wait_for_ready(spec, &handle, &endpoint).await {
            guard.cleanup().await;
            return Err(e);
        }

        tracing::info!("{} ready at {}", spec.image, endpoint);

        guard.disarm();
        Ok(ServiceSession { endpoint, handle })
    }

    /// Poll the probe with exponential backoff until ready or timed out.
    async fn wait_for_ready(
        &self,
        spec: &ServiceInstanceSpec,
        handle: &ContainerHandle,
        endpoint: &ServiceEndpoint,
    ) -> Result<()> {
        let mut backoff = Backoff::new(
            self.config.initial_backoff,
            self.config.max_backoff,
            spec.ready_timeout,
        );
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if self.probe.is_ready(endpoint).await {
                tracing::debug!("{} ready after {} attempts", handle.name, attempts);
                return Ok(());
            }

            match self.runtime.is_running(&handle.id).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(SessionError::ContainerExited {
                        name: handle.name.clone(),
                    });
                }
                Err(e) if e.is_not_found() => {
                    return Err(SessionError::ContainerExited {
                        name: handle.name.clone(),
                    });
                }
                Err(e) => tracing::debug!("Failed to inspect {}: {}", handle.name, e),
            }

            match backoff.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(SessionError::ReadinessTimeout {
                        image: spec.image.clone(),
                        timeout: spec.ready_timeout,
                    });
                }
            }
        }
    }

    /// Clean up a session started with [`start`](Self::start).
    #[cfg(test)]
    pub(crate) async fn finish(&self, session: ServiceSession) {
        cleanup_container(self.runtime.as_ref(), &session.handle).await;
    }
}
