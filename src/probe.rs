//! Readiness probing.
//!
//! A process accepting TCP connections is not the same as a database that
//! can authenticate a client, so the real probe performs a full protocol
//! handshake with the same client machinery tests will use. Every failure
//! (refused connection, protocol or auth error, timeout) is reported as "not
//! ready yet" and never as an error.

use async_trait::async_trait;

use crate::config::HarnessConfig;
use crate::lifecycle::ServiceEndpoint;

/// Answers whether a service completes its protocol handshake.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// `true` only after a successful handshake; never fails.
    async fn is_ready(&self, endpoint: &ServiceEndpoint) -> bool;
}

/// Readiness strategy chosen once at startup and injected into the manager.
#[derive(Debug, Clone)]
pub enum Prober {
    /// Connects with tokio-postgres and disconnects immediately.
    #[cfg(feature = "postgres")]
    Postgres(PostgresProbe),
    /// Reports ready unconditionally.
    ///
    /// Fallback for builds without a protocol client: the wait is skipped and
    /// a service that is not up yet surfaces on the first real query.
    AlwaysReady,
}

impl Prober {
    /// Pick the best strategy compiled into this build.
    pub fn detect(config: &HarnessConfig) -> Self {
        #[cfg(feature = "postgres")]
        let prober = Prober::Postgres(PostgresProbe::new(config.probe_timeout));

        #[cfg(not(feature = "postgres"))]
        let prober = {
            let _ = config;
            tracing::warn!(
                "No PostgreSQL client compiled in (feature `postgres` disabled); \
                 readiness checks always succeed"
            );
            Prober::AlwaysReady
        };

        tracing::debug!("Readiness probe: {}", prober.name());
        prober
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            #[cfg(feature = "postgres")]
            Prober::Postgres(_) => "postgres",
            Prober::AlwaysReady => "always-ready",
        }
    }
}

#[async_trait]
impl ReadinessProbe for Prober {
    async fn is_ready(&self, endpoint: &ServiceEndpoint) -> bool {
        match self {
            #[cfg(feature = "postgres")]
            Prober::Postgres(probe) => probe.is_ready(endpoint).await,
            Prober::AlwaysReady => true,
        }
    }
}

#[cfg(feature = "postgres")]
pub use postgres::PostgresProbe;

#[cfg(feature = "postgres")]
mod postgres {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_postgres::NoTls;

    use super::ReadinessProbe;
    use crate::lifecycle::ServiceEndpoint;

    /// Handshake probe using tokio-postgres without TLS.
    #[derive(Debug, Clone)]
    pub struct PostgresProbe {
        connect_timeout: Duration,
    }

    impl PostgresProbe {
        pub fn new(connect_timeout: Duration) -> Self {
            Self { connect_timeout }
        }

        async fn handshake(&self, endpoint: &ServiceEndpoint) -> Result<(), String> {
            let mut config = tokio_postgres::Config::new();
            config
                .host(&endpoint.host)
                .port(endpoint.port)
                .user(&endpoint.user)
                .password(&endpoint.password)
                .dbname(&endpoint.database)
                .connect_timeout(self.connect_timeout);

            let (client, connection) =
                tokio::time::timeout(self.connect_timeout, config.connect(NoTls))
                    .await
                    .map_err(|_| format!("no handshake within {:?}", self.connect_timeout))?
                    .map_err(|e| e.to_string())?;

            let driver = tokio::spawn(connection);
            // Dropping the client sends Terminate; the driver then finishes.
            drop(client);
            let _ = tokio::time::timeout(self.connect_timeout, driver).await;
            Ok(())
        }
    }

    #[async_trait]
    impl ReadinessProbe for PostgresProbe {
        async fn is_ready(&self, endpoint: &ServiceEndpoint) -> bool {
            match self.handshake(endpoint).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("Failed to connect to postgresql at {}: {}", endpoint, e);
                    false
                }
            }
        }
    }
}
