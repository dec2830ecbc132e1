//! Simulated host and share shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

use tradeflow::config::Config;
use tradeflow::errors::{RemoteError, RemoteResult, UnitError, UnitResult};
use tradeflow::remote::{DirectoryOutcome, RemoteEntry, ShareConnector, ShareSession};
use tradeflow::units::{CompletionWaiter, PollingWaiter, UnitManager, UnitStatus};
use tradeflow::OrchestratorContext;

struct SimUnit {
    status: UnitStatus,
    /// Observations a job stays running after a start; `None` for services
    runs_for: Option<usize>,
    remaining: usize,
    exit_code: i64,
    exited: bool,
}

/// A docker host where jobs finish after a fixed number of `list_running`
/// observations and services run until stopped
#[derive(Default)]
pub struct SimulatedHost {
    units: Mutex<HashMap<String, SimUnit>>,
    log: Mutex<Vec<String>>,
}

impl SimulatedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_job(&self, name: &str, runs_for: usize, exit_code: i64) {
        self.units.lock().unwrap().insert(
            name.to_string(),
            SimUnit {
                status: UnitStatus::Stopped,
                runs_for: Some(runs_for),
                remaining: 0,
                exit_code,
                exited: false,
            },
        );
    }

    pub fn add_service(&self, name: &str, status: UnitStatus) {
        self.units.lock().unwrap().insert(
            name.to_string(),
            SimUnit {
                status,
                runs_for: None,
                remaining: 0,
                exit_code: 0,
                exited: false,
            },
        );
    }

    /// Actions and job completions in the order they happened
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.log().iter().filter(|e| *e == entry).count()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn launch(&self, name: &str) -> UnitResult<()> {
        let mut units = self.units.lock().unwrap();
        let unit = units
            .get_mut(name)
            .ok_or_else(|| UnitError::NotFound(name.to_string()))?;
        unit.status = UnitStatus::Running;
        unit.remaining = unit.runs_for.unwrap_or(0);
        unit.exited = false;
        Ok(())
    }
}

#[async_trait]
impl UnitManager for SimulatedHost {
    async fn list_running(&self) -> UnitResult<Vec<String>> {
        let mut finished = Vec::new();
        let mut running = Vec::new();
        {
            let mut units = self.units.lock().unwrap();
            for (name, unit) in units.iter_mut() {
                if unit.status != UnitStatus::Running {
                    continue;
                }
                if unit.runs_for.is_some() {
                    if unit.remaining == 0 {
                        unit.status = UnitStatus::Stopped;
                        unit.exited = true;
                        finished.push(name.clone());
                        continue;
                    }
                    unit.remaining -= 1;
                }
                running.push(name.clone());
            }
        }
        finished.sort();
        for name in finished {
            self.record(format!("finished {}", name));
        }
        Ok(running)
    }

    async fn status(&self, name: &str) -> UnitResult<UnitStatus> {
        self.units
            .lock()
            .unwrap()
            .get(name)
            .map(|u| u.status)
            .ok_or_else(|| UnitError::NotFound(name.to_string()))
    }

    async fn start(&self, name: &str) -> UnitResult<()> {
        self.launch(name)?;
        self.record(format!("start {}", name));
        Ok(())
    }

    async fn stop(&self, name: &str) -> UnitResult<()> {
        {
            let mut units = self.units.lock().unwrap();
            let unit = units
                .get_mut(name)
                .ok_or_else(|| UnitError::NotFound(name.to_string()))?;
            unit.status = UnitStatus::Stopped;
        }
        self.record(format!("stop {}", name));
        Ok(())
    }

    async fn restart(&self, name: &str) -> UnitResult<()> {
        self.launch(name)?;
        self.record(format!("restart {}", name));
        Ok(())
    }

    async fn exit_code(&self, name: &str) -> UnitResult<Option<i64>> {
        let units = self.units.lock().unwrap();
        let unit = units
            .get(name)
            .ok_or_else(|| UnitError::NotFound(name.to_string()))?;
        Ok(unit.exited.then_some(unit.exit_code))
    }
}

#[derive(Default)]
struct ShareState {
    reachable: bool,
    files: BTreeMap<String, (Vec<u8>, NaiveDateTime)>,
    dirs: BTreeSet<String>,
    clock: i64,
    /// Every store is refused while set
    refuse_stores: bool,
    /// Paths whose delete is refused
    refuse_deletes: BTreeSet<String>,
}

/// Share kept in memory; every stored file gets a later create time than the last
#[derive(Clone)]
pub struct InMemoryShare {
    state: Arc<Mutex<ShareState>>,
}

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

impl InMemoryShare {
    pub fn new() -> Self {
        let state = ShareState {
            reachable: true,
            clock: 1_000,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn unreachable() -> Self {
        let share = Self::new();
        share.state.lock().unwrap().reachable = false;
        share
    }

    /// Refuse (or accept again) every upload
    pub fn refuse_stores(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_stores = refuse;
    }

    /// Refuse deleting `path`, as a share does for a file held open elsewhere
    pub fn refuse_delete(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .refuse_deletes
            .insert(path.to_string());
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .map(|(bytes, _)| bytes.clone())
    }

    /// Place a file created `secs` seconds after the share's epoch
    pub fn seed(&self, path: &str, secs: i64) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), (Vec::new(), epoch() + TimeDelta::seconds(secs)));
    }

    pub fn files(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    pub fn files_in(&self, folder: &str) -> Vec<String> {
        let prefix = format!("{}/", folder);
        self.files()
            .into_iter()
            .filter_map(|f| f.strip_prefix(&prefix).map(str::to_string))
            .filter(|f| !f.contains('/'))
            .collect()
    }

    pub fn dirs(&self) -> Vec<String> {
        self.state.lock().unwrap().dirs.iter().cloned().collect()
    }

    pub fn connector(&self) -> Arc<dyn ShareConnector> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl ShareConnector for InMemoryShare {
    async fn connect(&self) -> RemoteResult<Box<dyn ShareSession>> {
        if !self.state.lock().unwrap().reachable {
            return Err(RemoteError::Connect("connection refused".to_string()));
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl ShareSession for InMemoryShare {
    async fn store(&self, remote_path: &str, local_file: &Path) -> RemoteResult<u64> {
        let bytes = std::fs::read(local_file)?;
        let len = bytes.len() as u64;
        let mut state = self.state.lock().unwrap();
        if state.refuse_stores {
            return Err(RemoteError::Transfer {
                path: remote_path.to_string(),
                message: "NT_STATUS_DISK_FULL".to_string(),
            });
        }
        state.clock += 1;
        let created = epoch() + TimeDelta::seconds(state.clock);
        state.files.insert(remote_path.to_string(), (bytes, created));
        Ok(len)
    }

    async fn list(&self, remote_folder: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let prefix = format!("{}/", remote_folder);
        let state = self.state.lock().unwrap();

        let mut entries: Vec<RemoteEntry> = state
            .files
            .iter()
            .filter_map(|(path, (_, created))| {
                let name = path.strip_prefix(&prefix)?;
                (!name.contains('/')).then(|| RemoteEntry {
                    filename: name.to_string(),
                    create_time: *created,
                    is_directory: false,
                })
            })
            .collect();
        entries.extend(state.dirs.iter().filter_map(|dir| {
            let name = dir.strip_prefix(&prefix)?;
            (!name.contains('/')).then(|| RemoteEntry {
                filename: name.to_string(),
                create_time: epoch(),
                is_directory: true,
            })
        }));
        Ok(entries)
    }

    async fn delete(&self, remote_path: &str) -> RemoteResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.refuse_deletes.contains(remote_path) {
            return Err(RemoteError::Delete {
                path: remote_path.to_string(),
                message: "NT_STATUS_SHARING_VIOLATION".to_string(),
            });
        }
        match state.files.remove(remote_path) {
            Some(_) => Ok(()),
            None => Err(RemoteError::Delete {
                path: remote_path.to_string(),
                message: "no such file".to_string(),
            }),
        }
    }

    async fn mkdir(&self, remote_path: &str) -> RemoteResult<DirectoryOutcome> {
        if self.state.lock().unwrap().dirs.insert(remote_path.to_string()) {
            Ok(DirectoryOutcome::Created)
        } else {
            Ok(DirectoryOutcome::AlreadyExists)
        }
    }
}

/// Captures formatted log output for assertions
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub fn test_config(csv_dir: &Path, db_dir: &Path) -> Config {
    let vars: HashMap<&str, String> = HashMap::from([
        ("SAMBA_USER", "trader".to_string()),
        ("SAMBA_PASSWORD", "secret".to_string()),
        ("SAMBA_SHARE", "backups".to_string()),
        ("SAMBA_SERVER_IP", "10.0.0.5".to_string()),
        ("NAME_SUFFIX", "_test".to_string()),
        ("POLL_INTERVAL_SECS", "30".to_string()),
        ("GATEWAY_GRACE_SECS", "60".to_string()),
        ("CSV_BACKUP_DIR", csv_dir.display().to_string()),
        ("DB_BACKUP_DIR", db_dir.display().to_string()),
    ]);
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Context wired to a simulated host and an in-memory share
pub fn test_context(host: Arc<SimulatedHost>, share: &InMemoryShare, poll: Duration) -> OrchestratorContext {
    let units: Arc<dyn UnitManager> = host;
    let waiter: Arc<dyn CompletionWaiter> = Arc::new(PollingWaiter::new(units.clone(), poll));
    OrchestratorContext {
        units,
        waiter,
        share: share.connector(),
        reports: None,
    }
}

/// Every unit of the default pipeline, with `_test` suffix. Workers take a
/// few polls, the csv backup job fails.
pub fn trading_host() -> Arc<SimulatedHost> {
    let host = SimulatedHost::new();
    host.add_service("mongo_db_test", UnitStatus::Stopped);
    host.add_service("ib_gateway_test", UnitStatus::Stopped);
    host.add_job("run_cleaners_test", 1, 0);
    host.add_job("run_stack_handler_test", 2, 0);
    host.add_job("run_capital_update_test", 4, 0);
    host.add_job("run_daily_processes_test", 1, 0);
    host.add_job("csv_backup_test", 1, 1);
    host.add_job("db_backup_test", 1, 0);
    host
}
