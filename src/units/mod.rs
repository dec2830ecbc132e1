//! Execution units: named, externally managed containers
//! Status is always re-queried from the host manager, never cached

pub mod docker;
pub mod waiter;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::UnitResult;

pub use docker::DockerCli;
pub use waiter::{CompletionWaiter, PollingWaiter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Running,
    Stopped,
    Unknown,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Running => write!(f, "running"),
            UnitStatus::Stopped => write!(f, "stopped"),
            UnitStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Base name plus deployment suffix, e.g. `mongo_db` + `_paper`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitName {
    base: String,
    suffix: String,
}

impl UnitName {
    pub fn new(base: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            suffix: suffix.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Name as registered with the host manager
    pub fn full(&self) -> String {
        format!("{}{}", self.base, self.suffix)
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.suffix)
    }
}

/// Ordered units, waited on together. Order matters for starting,
/// membership is what matters for waiting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitSet(Vec<UnitName>);

impl UnitSet {
    pub fn new(units: Vec<UnitName>) -> Self {
        Self(units)
    }

    pub fn single(unit: UnitName) -> Self {
        Self(vec![unit])
    }

    pub fn from_bases<S: AsRef<str>>(bases: &[S], suffix: &str) -> Self {
        Self(bases.iter().map(|b| UnitName::new(b.as_ref(), suffix)).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnitName> {
        self.0.iter()
    }

    pub fn contains(&self, full_name: &str) -> bool {
        self.0.iter().any(|u| u.full() == full_name)
    }

    /// Members of this set that appear in `running`, in set order
    pub fn still_running(&self, running: &[String]) -> Vec<String> {
        self.0
            .iter()
            .map(UnitName::full)
            .filter(|name| running.iter().any(|r| r == name))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UnitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(UnitName::full).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Host-level execution-unit manager
#[async_trait]
pub trait UnitManager: Send + Sync {
    /// Full names of every unit currently running
    async fn list_running(&self) -> UnitResult<Vec<String>>;

    async fn status(&self, name: &str) -> UnitResult<UnitStatus>;

    async fn start(&self, name: &str) -> UnitResult<()>;

    async fn stop(&self, name: &str) -> UnitResult<()>;

    async fn restart(&self, name: &str) -> UnitResult<()>;

    /// Exit code of the unit's last run, `None` while it has not exited
    async fn exit_code(&self, name: &str) -> UnitResult<Option<i64>>;
}

/// Handle to one registered execution unit.
///
/// Start/stop requests return as soon as the manager accepts them; the
/// completion waiter is the only synchronization point.
#[derive(Clone)]
pub struct UnitHandle {
    name: UnitName,
    manager: Arc<dyn UnitManager>,
}

impl UnitHandle {
    /// Look up a unit, failing with `NotFound` or `ManagerUnavailable`
    pub async fn get(manager: Arc<dyn UnitManager>, name: UnitName) -> UnitResult<Self> {
        manager.status(&name.full()).await?;
        Ok(Self { name, manager })
    }

    pub fn name(&self) -> &UnitName {
        &self.name
    }

    pub async fn status(&self) -> UnitResult<UnitStatus> {
        self.manager.status(&self.name.full()).await
    }

    /// Start unless already running
    pub async fn start(&self) -> UnitResult<()> {
        let full = self.name.full();
        if self.status().await? != UnitStatus::Running {
            info!(unit = %full, "Starting unit");
            self.manager.start(&full).await?;
        }
        Ok(())
    }

    /// Start the unit, restarting it if a stale instance is still running
    pub async fn ensure_running(&self) -> UnitResult<()> {
        let full = self.name.full();
        if self.status().await? == UnitStatus::Running {
            warn!(unit = %full, "Unit already running when a fresh run was requested, restarting it");
            self.manager.restart(&full).await
        } else {
            info!(unit = %full, "Starting unit");
            self.manager.start(&full).await
        }
    }

    /// Stop if running
    pub async fn stop(&self) -> UnitResult<()> {
        let full = self.name.full();
        if self.status().await? == UnitStatus::Running {
            info!(unit = %full, "Stopping unit");
            self.manager.stop(&full).await?;
        }
        Ok(())
    }

    pub async fn exit_code(&self) -> UnitResult<Option<i64>> {
        self.manager.exit_code(&self.name.full()).await
    }
}
