//! Ephemeral service lifecycle management.
//!
//! Every session gets its own container, container name and host port, and
//! the container is killed and removed when the session ends, whether the
//! setup succeeded, timed out or the caller panicked.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                          LifecycleManager                                 │
//! │                                                                           │
//! │   scoped(spec, f)                                                         │
//! │         │                                                                 │
//! │         ▼                                                                 │
//! │   ┌──────────────┐     ┌──────────────┐     ┌──────────────────────────┐  │
//! │   │ Pull Image   │────▶│ Reserve Port │────▶│ Create & Start Container │  │
//! │   └──────────────┘     └──────────────┘     └──────────────────────────┘  │
//! │                                                        │                  │
//! │                                                        ▼                  │
//! │                        ┌──────────────┐     ┌──────────────────────────┐  │
//! │                        │ f(endpoint)  │◀────│ Probe with Backoff       │  │
//! │                        └──────────────┘     └──────────────────────────┘  │
//! │                               │                        │ timeout/error    │
//! │                               ▼                        ▼                  │
//! │                        ┌──────────────────────────────────────────────┐   │
//! │                        │ Kill & Remove Container (always)             │   │
//! │                        └──────────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use ephemeral_pg::config::HarnessConfig;
//! use ephemeral_pg::lifecycle::{LifecycleManager, PostgresVersion};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = LifecycleManager::connect(HarnessConfig::resolve()?).await?;
//!
//! manager
//!     .postgres(PostgresVersion::V16, |endpoint| async move {
//!         println!("connect to {}", endpoint.connection_string());
//!     })
//!     .await?;
//! // Container is gone here
//! # Ok(())
//! # }
//! ```

mod backoff;
pub mod manager;
pub mod port;
pub mod spec;

pub use manager::LifecycleManager;
pub(crate) use manager::{ContainerHandle, cleanup_container};
pub use port::{PortReservation, reserve_port};
pub use spec::{
    POSTGRES_DATA_PATH, POSTGRES_PORT, PostgresVersion, ServiceEndpoint, ServiceInstanceSpec,
};
