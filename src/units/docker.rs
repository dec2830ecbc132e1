// Docker-backed unit manager
// Drives the docker CLI, so the daemon socket and its permissions are the CLI's concern

use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{UnitManager, UnitStatus};
use crate::errors::{UnitError, UnitResult};

pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run one docker command and return trimmed stdout
    async fn docker(&self, unit: &str, action: &str, args: &[&str]) -> UnitResult<String> {
        debug!(binary = %self.binary, ?args, "Running docker command");

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                UnitError::ManagerUnavailable(format!("cannot run '{}': {}", self.binary, e))
            })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(unit, action, stderr.trim()))
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

/// Map docker CLI stderr onto the unit error taxonomy
pub fn classify_failure(unit: &str, action: &str, stderr: &str) -> UnitError {
    let lower = stderr.to_lowercase();

    if lower.contains("no such object") || lower.contains("no such container") {
        UnitError::NotFound(unit.to_string())
    } else if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("permission denied while trying to connect")
        || lower.contains("error during connect")
    {
        UnitError::ManagerUnavailable(stderr.to_string())
    } else {
        UnitError::action_failed(unit, action, stderr)
    }
}

/// Map a docker `State.Status` onto a unit status
pub fn parse_status(raw: &str) -> UnitStatus {
    match raw.trim() {
        "running" | "restarting" => UnitStatus::Running,
        "created" | "exited" | "dead" | "paused" | "removing" => UnitStatus::Stopped,
        _ => UnitStatus::Unknown,
    }
}

#[async_trait]
impl UnitManager for DockerCli {
    async fn list_running(&self) -> UnitResult<Vec<String>> {
        let stdout = self
            .docker("*", "list", &["ps", "--format", "{{.Names}}"])
            .await?;

        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn status(&self, name: &str) -> UnitResult<UnitStatus> {
        let stdout = self
            .docker(name, "inspect", &["inspect", "--format", "{{.State.Status}}", name])
            .await?;
        Ok(parse_status(&stdout))
    }

    async fn start(&self, name: &str) -> UnitResult<()> {
        self.docker(name, "start", &["start", name]).await.map(|_| ())
    }

    async fn stop(&self, name: &str) -> UnitResult<()> {
        self.docker(name, "stop", &["stop", name]).await.map(|_| ())
    }

    async fn restart(&self, name: &str) -> UnitResult<()> {
        self.docker(name, "restart", &["restart", name]).await.map(|_| ())
    }

    async fn exit_code(&self, name: &str) -> UnitResult<Option<i64>> {
        let stdout = self
            .docker(
                name,
                "inspect",
                &["inspect", "--format", "{{.State.Status}} {{.State.ExitCode}}", name],
            )
            .await?;

        let mut parts = stdout.split_whitespace();
        let status = parts.next().map(parse_status).unwrap_or(UnitStatus::Unknown);
        if status == UnitStatus::Running {
            return Ok(None);
        }

        Ok(parts.next().and_then(|code| code.parse().ok()))
    }
}
