//! Test doubles for the container runtime and the readiness probe.
//!
//! Provides:
//! - [`RecordingRuntime`]: an in-memory [`ContainerRuntime`] that records
//!   every call and can be told to fail at each step
//! - [`StubProbe`]: a [`ReadinessProbe`] that becomes ready after a fixed
//!   number of attempts (or never)
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use ephemeral_pg::config::HarnessConfig;
//! use ephemeral_pg::lifecycle::LifecycleManager;
//! use ephemeral_pg::testing::{RecordingRuntime, StubProbe};
//!
//! let runtime = Arc::new(RecordingRuntime::new());
//! let manager = LifecycleManager::new(
//!     runtime.clone(),
//!     Arc::new(StubProbe::always()),
//!     HarnessConfig::default(),
//! );
//! # let _ = manager;
//! ```

use std::collections::BTreeMap;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::lifecycle::ServiceEndpoint;
use crate::probe::ReadinessProbe;
use crate::runtime::{ContainerRequest, ContainerRuntime};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One recorded runtime operation.
///
/// `Create` carries the container name, `Remove` whatever identifier it was
/// called with, the rest carry the container id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Pull(String),
    Create(String),
    Start(String),
    IsRunning(String),
    Kill(String),
    Remove(String),
}

struct FakeContainer {
    name: String,
    request: ContainerRequest,
    /// Holds the published host port while running, like docker-proxy.
    listener: Option<TcpListener>,
}

/// In-memory container runtime that records calls.
///
/// `start` binds the requested host port on the loopback interface and
/// `kill` releases it, so ports of live fake containers are really taken.
pub struct RecordingRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    containers: Mutex<BTreeMap<String, FakeContainer>>,
    created: Mutex<Vec<(String, ContainerRequest)>>,
    next_id: AtomicU32,
    fail_pull: AtomicBool,
    fail_create: AtomicBool,
    fail_start: AtomicBool,
    exit_on_start: AtomicBool,
    remove_not_found: AtomicBool,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            containers: Mutex::new(BTreeMap::new()),
            created: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            fail_pull: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            exit_on_start: AtomicBool::new(false),
            remove_not_found: AtomicBool::new(false),
        }
    }

    /// Make `pull` fail.
    pub fn set_fail_pull(&self, fail: bool) {
        self.fail_pull.store(fail, Ordering::Relaxed);
    }

    /// Make `create_container` fail without registering a container.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::Relaxed);
    }

    /// Make `start` fail, leaving the created container behind.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::Relaxed);
    }

    /// Containers stop right after starting, so `is_running` reports false.
    pub fn set_exit_on_start(&self, exit: bool) {
        self.exit_on_start.store(exit, Ordering::Relaxed);
    }

    /// `remove` deletes the container but reports it as not found.
    pub fn set_remove_not_found(&self, not_found: bool) {
        self.remove_not_found.store(not_found, Ordering::Relaxed);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    /// Requests of every successful create, in order.
    pub fn requests(&self) -> Vec<ContainerRequest> {
        lock(&self.created).iter().map(|(_, r)| r.clone()).collect()
    }

    /// Ids of every successful create, in order.
    pub fn ids(&self) -> Vec<String> {
        lock(&self.created).iter().map(|(id, _)| id.clone()).collect()
    }

    /// Names of containers that were created and not yet removed.
    pub fn live_containers(&self) -> Vec<String> {
        lock(&self.containers)
            .values()
            .map(|c| c.name.clone())
            .collect()
    }

    fn record(&self, call: RuntimeCall) {
        lock(&self.calls).push(call);
    }

    fn not_found(id: &str) -> RuntimeError {
        RuntimeError::NotFound { id: id.to_string() }
    }
}

impl Default for RecordingRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Pull(image.to_string()));
        if self.fail_pull.load(Ordering::Relaxed) {
            return Err(RuntimeError::api(format!("manifest for {image} not found")));
        }
        Ok(())
    }

    async fn create_container(&self, request: &ContainerRequest) -> Result<String, RuntimeError> {
        self.record(RuntimeCall::Create(request.name.clone()));
        if self.fail_create.load(Ordering::Relaxed) {
            return Err(RuntimeError::api("no space left on device"));
        }

        let id = format!("fake-{:04}", self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.containers).insert(
            id.clone(),
            FakeContainer {
                name: request.name.clone(),
                request: request.clone(),
                listener: None,
            },
        );
        lock(&self.created).push((id.clone(), request.clone()));
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Start(id.to_string()));
        if self.fail_start.load(Ordering::Relaxed) {
            return Err(RuntimeError::api("OCI runtime create failed"));
        }

        let mut containers = lock(&self.containers);
        let container = containers.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if self.exit_on_start.load(Ordering::Relaxed) {
            return Ok(());
        }

        let address = (
            container.request.host_ip.as_str(),
            container.request.host_port,
        );
        let listener = TcpListener::bind(address).map_err(|e| {
            RuntimeError::api(format!(
                "Bind for {}:{} failed: {e}",
                container.request.host_ip, container.request.host_port
            ))
        })?;
        container.listener = Some(listener);
        Ok(())
    }

    async fn is_running(&self, id: &str) -> Result<bool, RuntimeError> {
        self.record(RuntimeCall::IsRunning(id.to_string()));
        lock(&self.containers)
            .get(id)
            .map(|c| c.listener.is_some())
            .ok_or_else(|| Self::not_found(id))
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Kill(id.to_string()));
        let mut containers = lock(&self.containers);
        let container = containers.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        match container.listener.take() {
            Some(_) => Ok(()),
            None => Err(RuntimeError::api(format!("container {id} is not running"))),
        }
    }

    async fn remove(&self, id: &str, _remove_volumes: bool) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::Remove(id.to_string()));
        let removed = lock(&self.containers).remove(id);
        if removed.is_none() || self.remove_not_found.load(Ordering::Relaxed) {
            return Err(Self::not_found(id));
        }
        Ok(())
    }
}

/// A readiness probe that succeeds from a given attempt onwards.
pub struct StubProbe {
    ready_after: Option<u32>,
    call_count: AtomicU32,
    seen: Mutex<Vec<ServiceEndpoint>>,
}

impl StubProbe {
    /// Ready on the first attempt.
    pub fn always() -> Self {
        Self::ready_after(1)
    }

    /// Never ready.
    pub fn never() -> Self {
        Self {
            ready_after: None,
            call_count: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Ready on attempt `attempt` (1-based) and every attempt after it.
    pub fn ready_after(attempt: u32) -> Self {
        Self {
            ready_after: Some(attempt),
            ..Self::never()
        }
    }

    /// Number of probe attempts so far.
    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Endpoints the probe reported ready.
    pub fn seen(&self) -> Vec<ServiceEndpoint> {
        lock(&self.seen).clone()
    }
}

#[async_trait]
impl ReadinessProbe for StubProbe {
    async fn is_ready(&self, endpoint: &ServiceEndpoint) -> bool {
        let attempt = self.call_count.fetch_add(1, Ordering::Relaxed) + 1;
        let ready = self.ready_after.is_some_and(|n| attempt >= n);
        if ready {
            lock(&self.seen).push(endpoint.clone());
        }
        ready
    }
}
