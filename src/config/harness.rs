use std::time::Duration;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;

/// Loopback address used for every host port binding.
///
/// Remote Docker hosts (`DOCKER_HOST=tcp://...`) are not supported: the
/// published port would not be reachable on this address.
pub const LOCALHOST: &str = "127.0.0.1";

/// Settings shared by every session a manager starts.
///
/// Credentials default to the weakest setup that works for a throwaway
/// instance: the container runs with trust authentication, so the password is
/// only carried along for clients that insist on sending one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Host the container port is published on (default: 127.0.0.1).
    pub host: String,
    /// Database user (default: postgres).
    pub user: String,
    /// Database password (default: mysecretpassword).
    pub password: String,
    /// Database name (default: postgres).
    pub database: String,
    /// Image repository used for PostgreSQL variants (default: postgres).
    pub image_repository: String,
    /// Prefix for generated container names (default: ephemeral-pg).
    pub name_prefix: String,
    /// How long to wait for a protocol handshake to succeed.
    pub ready_timeout: Duration,
    /// First delay between readiness attempts.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between readiness attempts.
    pub max_backoff: Duration,
    /// Timeout for a single probe connection attempt.
    pub probe_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            host: LOCALHOST.to_string(),
            user: "postgres".to_string(),
            password: "mysecretpassword".to_string(),
            database: "postgres".to_string(),
            image_repository: "postgres".to_string(),
            name_prefix: "ephemeral-pg".to_string(),
            ready_timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_micros(500),
            max_backoff: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

impl HarnessConfig {
    /// Build the configuration from defaults plus `EPHEMERAL_PG_*` overrides.
    pub fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ready_timeout_secs = parse_optional_env(
            "EPHEMERAL_PG_READY_TIMEOUT_SECS",
            defaults.ready_timeout.as_secs(),
        )?;
        if ready_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EPHEMERAL_PG_READY_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let max_backoff_ms = parse_optional_env(
            "EPHEMERAL_PG_MAX_BACKOFF_MS",
            defaults.max_backoff.as_millis() as u64,
        )?;

        Ok(Self {
            user: optional_env("EPHEMERAL_PG_USER")?.unwrap_or(defaults.user),
            password: optional_env("EPHEMERAL_PG_PASSWORD")?.unwrap_or(defaults.password),
            database: optional_env("EPHEMERAL_PG_DATABASE")?.unwrap_or(defaults.database),
            image_repository: optional_env("EPHEMERAL_PG_IMAGE")?
                .unwrap_or(defaults.image_repository),
            name_prefix: optional_env("EPHEMERAL_PG_NAME_PREFIX")?.unwrap_or(defaults.name_prefix),
            ready_timeout: Duration::from_secs(ready_timeout_secs),
            max_backoff: Duration::from_millis(max_backoff_ms).max(defaults.initial_backoff),
            ..defaults
        })
    }

    /// Override the readiness timeout.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Override the backoff bounds.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max.max(initial);
        self
    }
}
