//! Synchronous scoped sessions for plain `#[test]` functions.
//!
//! [`BlockingLifecycleManager`] drives the async [`LifecycleManager`] on a
//! runtime it owns. [`ServiceGuard`] is the scoped session: the container is
//! killed and removed when the guard is dropped, including during a panic
//! unwind. There is no explicit stop call.
//!
//! Do not call [`BlockingLifecycleManager::run_instance`] from async code; use
//! [`LifecycleManager::scoped`] there.

use std::ops::Deref;
use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::config::HarnessConfig;
use crate::error::{Result, SessionError};
use crate::lifecycle::{
    ContainerHandle, LifecycleManager, PostgresVersion, ServiceEndpoint, ServiceInstanceSpec,
    cleanup_container,
};

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("ephemeral-pg")
        .enable_all()
        .build()
        .map_err(SessionError::Runtime)
}

/// Blocking front end over [`LifecycleManager`].
///
/// Cheap to share across threads; each thread can hold its own guards.
pub struct BlockingLifecycleManager {
    runtime: Arc<Runtime>,
    manager: Arc<LifecycleManager>,
}

impl BlockingLifecycleManager {
    /// Wrap an existing manager.
    pub fn new(manager: LifecycleManager) -> Result<Self> {
        Ok(Self {
            runtime: Arc::new(build_runtime()?),
            manager: Arc::new(manager),
        })
    }

    /// Connect to the local Docker daemon.
    pub fn connect(config: HarnessConfig) -> Result<Self> {
        let runtime = build_runtime()?;
        let manager = runtime.block_on(LifecycleManager::connect(config))?;
        Ok(Self {
            runtime: Arc::new(runtime),
            manager: Arc::new(manager),
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        self.manager.config()
    }

    /// Start `spec` and block until it is ready.
    pub fn run_instance(&self, spec: &ServiceInstanceSpec) -> Result<ServiceGuard> {
        let session = self.runtime.block_on(self.manager.start(spec))?;
        Ok(ServiceGuard {
            endpoint: session.endpoint,
            handle: Some(session.handle),
            manager: Arc::clone(&self.manager),
            runtime: Some(Arc::clone(&self.runtime)),
        })
    }

    /// Start a PostgreSQL variant built from this manager's configuration.
    pub fn postgres(&self, version: PostgresVersion) -> Result<ServiceGuard> {
        let spec = ServiceInstanceSpec::postgres(version, self.manager.config());
        self.run_instance(&spec)
    }

    /// Run the configured readiness probe once, blocking.
    pub fn is_ready(&self, endpoint: &ServiceEndpoint) -> bool {
        self.runtime.block_on(self.manager.probe().is_ready(endpoint))
    }
}

/// A ready service; dropping the guard removes its container.
pub struct ServiceGuard {
    endpoint: ServiceEndpoint,
    handle: Option<ContainerHandle>,
    manager: Arc<LifecycleManager>,
    /// Taken in `drop` so the last reference can be released off any async
    /// thread.
    runtime: Option<Arc<Runtime>>,
}

impl ServiceGuard {
    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }
}

impl Deref for ServiceGuard {
    type Target = ServiceEndpoint;

    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

impl std::fmt::Debug for ServiceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceGuard")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        let (Some(handle), Some(runtime)) = (self.handle.take(), self.runtime.take()) else {
            return;
        };
        let cleanup = cleanup_container(self.manager.runtime().as_ref(), &handle);

        if tokio::runtime::Handle::try_current().is_ok() {
            // Neither block_on nor dropping a runtime is allowed on an async
            // thread; do both on a plain one.
            std::thread::scope(|s| {
                let joined = s
                    .spawn(move || {
                        runtime.block_on(cleanup);
                        drop(runtime);
                    })
                    .join();
                if joined.is_err() {
                    tracing::warn!("Cleanup thread for {} panicked", handle.name);
                }
            });
        } else {
            runtime.block_on(cleanup);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{RecordingRuntime, RuntimeCall, StubProbe};

    fn blocking(runtime: &Arc<RecordingRuntime>, probe: StubProbe) -> BlockingLifecycleManager {
        let config = HarnessConfig::default().with_ready_timeout(Duration::from_millis(100));
        let manager = LifecycleManager::new(runtime.clone(), Arc::new(probe), config);
        BlockingLifecycleManager::new(manager).unwrap()
    }

    #[test]
    fn test_guard_drop_removes_container() {
        let runtime = Arc::new(RecordingRuntime::new());
        let manager = blocking(&runtime, StubProbe::always());

        let guard = manager.postgres(PostgresVersion::V13).unwrap();
        assert_eq!(guard.user, "postgres");
        assert_eq!(runtime.requests()[0].image, "postgres:13");
        assert_eq!(runtime.live_containers().len(), 1);

        drop(guard);

        assert!(runtime.live_containers().is_empty());
        let id = runtime.ids().pop().unwrap();
        assert_eq!(runtime.calls().last(), Some(&RuntimeCall::Remove(id)));
    }

    #[test]
    fn test_guard_cleans_up_on_panic() {
        let runtime = Arc::new(RecordingRuntime::new());
        let manager = blocking(&runtime, StubProbe::always());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = manager.postgres(PostgresVersion::Latest).unwrap();
            panic!("assertion in test body");
        }));

        assert!(result.is_err());
        assert!(runtime.live_containers().is_empty());
    }

    #[test]
    fn test_timeout_returns_error_without_guard() {
        let runtime = Arc::new(RecordingRuntime::new());
        let manager = blocking(&runtime, StubProbe::never());

        let err = manager.postgres(PostgresVersion::V16).unwrap_err();
        assert!(matches!(err, SessionError::ReadinessTimeout { .. }));
        assert!(runtime.live_containers().is_empty());
    }

    #[test]
    fn test_guards_on_separate_threads() {
        let runtime = Arc::new(RecordingRuntime::new());
        let manager = Arc::new(blocking(&runtime, StubProbe::always()));

        let ports: Vec<u16> = [PostgresVersion::V14, PostgresVersion::V15]
            .into_iter()
            .map(|version| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || manager.postgres(version).unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<ServiceGuard>>()
            .iter()
            .map(|guard| guard.port)
            .collect();

        assert_eq!(ports.len(), 2);
        assert_ne!(ports[0], ports[1]);
        assert!(runtime.live_containers().is_empty());
    }

    #[tokio::test]
    async fn test_guard_dropped_inside_runtime() {
        let runtime = Arc::new(RecordingRuntime::new());
        let recording = Arc::clone(&runtime);

        // Build and start outside the async context, drop inside it.
        let guard = tokio::task::spawn_blocking(move || {
            blocking(&recording, StubProbe::always())
                .postgres(PostgresVersion::V12)
                .unwrap()
        })
        .await
        .unwrap();

        drop(guard);
        assert!(runtime.live_containers().is_empty());
    }
}
