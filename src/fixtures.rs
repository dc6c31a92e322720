//! One entry point per supported PostgreSQL variant.
//!
//! Each call connects to Docker, starts a fresh container on its own port and
//! returns a guard; nothing is shared between calls. Hold the guard for as
//! long as the database is needed: a single test, a helper shared by a test
//! module, or the whole `main` of a custom test harness.
//!
//! ```rust,no_run
//! #[test]
//! fn counts_rows() {
//!     let pg = ephemeral_pg::fixtures::pg_16().unwrap();
//!     let url = pg.connection_string();
//!     // ... connect and run queries against `url`
//! }
//! ```

use std::future::Future;

use crate::blocking::{BlockingLifecycleManager, ServiceGuard};
use crate::config::HarnessConfig;
use crate::error::Result;
use crate::lifecycle::{LifecycleManager, PostgresVersion, ServiceEndpoint};

/// Start `version` with configuration resolved from the environment.
pub fn run_pg(version: PostgresVersion) -> Result<ServiceGuard> {
    let manager = BlockingLifecycleManager::connect(HarnessConfig::resolve()?)?;
    manager.postgres(version)
}

/// `postgres:latest`.
pub fn pg() -> Result<ServiceGuard> {
    run_pg(PostgresVersion::Latest)
}

pub fn pg_11() -> Result<ServiceGuard> {
    run_pg(PostgresVersion::V11)
}

pub fn pg_12() -> Result<ServiceGuard> {
    run_pg(PostgresVersion::V12)
}

pub fn pg_13() -> Result<ServiceGuard> {
    run_pg(PostgresVersion::V13)
}

pub fn pg_14() -> Result<ServiceGuard> {
    run_pg(PostgresVersion::V14)
}

pub fn pg_15() -> Result<ServiceGuard> {
    run_pg(PostgresVersion::V15)
}

pub fn pg_16() -> Result<ServiceGuard> {
    run_pg(PostgresVersion::V16)
}

/// Async counterpart of [`run_pg`]: run `f` against a fresh instance.
pub async fn with_pg<F, Fut, T>(version: PostgresVersion, f: F) -> Result<T>
where
    F: FnOnce(ServiceEndpoint) -> Fut,
    Fut: Future<Output = T>,
{
    let manager = LifecycleManager::connect(HarnessConfig::resolve()?).await?;
    manager.postgres(version, f).await
}
