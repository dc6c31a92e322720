//! Disposable PostgreSQL instances in Docker for test suites.
//!
//! A session pulls an image, publishes the container port on a free loopback
//! port, waits until a real protocol handshake succeeds and hands out a
//! [`ServiceEndpoint`]. When the session ends the container is killed and
//! removed, whatever happened in between.
//!
//! - [`fixtures`]: `pg()`, `pg_11()` … `pg_16()` for plain `#[test]`s
//! - [`LifecycleManager::scoped`]: async scoped sessions
//! - [`BlockingLifecycleManager`]: blocking sessions over any
//!   [`ServiceInstanceSpec`]

pub mod blocking;
pub mod config;
pub mod error;
pub mod fixtures;
pub mod lifecycle;
pub mod probe;
pub mod runtime;
pub mod testing;

pub use blocking::{BlockingLifecycleManager, ServiceGuard};
pub use config::HarnessConfig;
pub use error::{Result, SessionError};
pub use lifecycle::{LifecycleManager, PostgresVersion, ServiceEndpoint, ServiceInstanceSpec};
pub use probe::{Prober, ReadinessProbe};
