//! Tells a missing Docker install apart from a stopped daemon, so setup
//! errors and `ephemeral-pg doctor` can name the next step.

use std::fmt;

/// What the daemon lookup found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerStatus {
    /// A daemon answered a ping.
    Available,
    /// No `docker` binary on PATH and no daemon.
    NotInstalled,
    /// The binary is there but nothing answered on any socket.
    NotRunning,
}

#[cfg(target_os = "macos")]
const INSTALL_HINT: &str = "install Docker Desktop (https://docs.docker.com/desktop/install/mac-install/) or set DOCKER_HOST";
#[cfg(target_os = "macos")]
const START_HINT: &str = "start Docker Desktop with `open -a Docker`, then retry";

#[cfg(windows)]
const INSTALL_HINT: &str = "install Docker Desktop (https://docs.docker.com/desktop/install/windows-install/) or set DOCKER_HOST";
#[cfg(windows)]
const START_HINT: &str = "start Docker Desktop, then retry";

#[cfg(not(any(target_os = "macos", windows)))]
const INSTALL_HINT: &str =
    "install Docker Engine (https://docs.docker.com/engine/install/) or set DOCKER_HOST";
#[cfg(not(any(target_os = "macos", windows)))]
const START_HINT: &str =
    "run `sudo systemctl start docker` (or `systemctl --user start docker` when rootless), then retry";

impl DockerStatus {
    pub fn is_ok(self) -> bool {
        self == DockerStatus::Available
    }

    /// Next step for the user; `None` once a daemon answers.
    pub fn remedy(self) -> Option<&'static str> {
        match self {
            DockerStatus::Available => None,
            DockerStatus::NotInstalled => Some(INSTALL_HINT),
            DockerStatus::NotRunning => Some(START_HINT),
        }
    }
}

impl fmt::Display for DockerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DockerStatus::Available => "available",
            DockerStatus::NotInstalled => "not installed",
            DockerStatus::NotRunning => "not running",
        })
    }
}

/// Ping the daemon through the same sockets sessions use.
pub async fn check_docker() -> DockerStatus {
    if crate::runtime::connect_docker().await.is_ok() {
        return DockerStatus::Available;
    }
    diagnose_unreachable()
}

/// Status of a daemon that already failed to answer.
pub(crate) fn diagnose_unreachable() -> DockerStatus {
    let finder = if cfg!(windows) { "where" } else { "which" };
    let found = std::process::Command::new(finder)
        .arg("docker")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success());

    if found {
        DockerStatus::NotRunning
    } else {
        DockerStatus::NotInstalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remedy_only_when_unavailable() {
        assert_eq!(DockerStatus::Available.remedy(), None);
        assert!(DockerStatus::NotInstalled.remedy().unwrap().contains("DOCKER_HOST"));
        assert!(DockerStatus::NotRunning.remedy().unwrap().ends_with("retry"));
    }

    #[test]
    fn test_display() {
        assert_eq!(DockerStatus::NotRunning.to_string(), "not running");
        assert!(DockerStatus::Available.is_ok());
        assert!(!DockerStatus::NotInstalled.is_ok());
    }

    #[test]
    fn test_diagnose_never_reports_available() {
        assert!(!diagnose_unreachable().is_ok());
    }
}
