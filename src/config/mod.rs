use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::orchestrator::ScheduleWindow;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub share: ShareConfig,
    pub units: UnitConfig,
    pub schedule: ScheduleConfig,
    pub backup: BackupConfig,
    pub reports: ReportsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConfig {
    pub user: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub share: String,
    pub server_ip: String,
    /// NetBIOS name of the server, defaults to the server ip
    pub remote_name: String,
    pub port: u16,
    pub smbclient_bin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Appended to every unit name, separates deployments sharing a host
    pub name_suffix: String,
    pub docker_bin: String,
    pub cleanup: String,
    pub workers: Vec<String>,
    pub daily_batch: String,
    pub csv_backup: String,
    pub database: String,
    pub db_backup: String,
    pub gateway: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub window: ScheduleWindow,
    pub timezone: String,
    pub poll_interval_secs: u64,
    pub gate_check_interval_secs: u64,
    pub gateway_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    pub csv_dir: PathBuf,
    pub db_dir: PathBuf,
    pub remote_csv_folder: String,
    pub remote_db_folder: String,
    pub csv_retention: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportsConfig {
    /// Report sync is skipped when unset
    pub dir: Option<PathBuf>,
    pub remote: String,
    pub branch: Option<String>,
    pub git_bin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: PathBuf,
}

impl ScheduleConfig {
    pub fn tz(&self) -> Result<Tz> {
        Tz::from_str(&self.timezone)
            .map_err(|e| anyhow::anyhow!("Invalid TIMEZONE value '{}': {}", self.timezone, e))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn gate_check_interval(&self) -> Duration {
        Duration::from_secs(self.gate_check_interval_secs)
    }

    pub fn gateway_grace(&self) -> Duration {
        Duration::from_secs(self.gateway_grace_secs)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file - this sets env vars that aren't already set
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .with_context(|| format!("{} environment variable is required but not set", key))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let server_ip = required("SAMBA_SERVER_IP")?;

        let workers: Vec<String> = or_default("WORKER_UNITS", "run_stack_handler,run_capital_update")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if workers.is_empty() {
            bail!("WORKER_UNITS must name at least one unit");
        }

        let window = ScheduleWindow::new(
            or_default("WEEKDAY_START", "1")
                .parse()
                .context("Invalid WEEKDAY_START value")?,
            or_default("WEEKDAY_END", "5")
                .parse()
                .context("Invalid WEEKDAY_END value")?,
            or_default("STOP_HOUR", "22")
                .parse()
                .context("Invalid STOP_HOUR value")?,
        )?;

        let config = Config {
            share: ShareConfig {
                user: required("SAMBA_USER")?,
                password: required("SAMBA_PASSWORD")?,
                share: required("SAMBA_SHARE")?,
                remote_name: or_default("SAMBA_REMOTE_NAME", &server_ip),
                server_ip,
                port: or_default("SAMBA_PORT", "139")
                    .parse()
                    .context("Invalid SAMBA_PORT value")?,
                smbclient_bin: or_default("SMBCLIENT_BIN", "smbclient"),
            },
            units: UnitConfig {
                name_suffix: or_default("NAME_SUFFIX", ""),
                docker_bin: or_default("DOCKER_BIN", "docker"),
                cleanup: or_default("CLEANUP_UNIT", "run_cleaners"),
                workers,
                daily_batch: or_default("DAILY_BATCH_UNIT", "run_daily_processes"),
                csv_backup: or_default("CSV_BACKUP_UNIT", "csv_backup"),
                database: or_default("DATABASE_UNIT", "mongo_db"),
                db_backup: or_default("DB_BACKUP_UNIT", "db_backup"),
                gateway: or_default("GATEWAY_UNIT", "ib_gateway"),
            },
            schedule: ScheduleConfig {
                window,
                timezone: or_default("TIMEZONE", "America/New_York"),
                poll_interval_secs: or_default("POLL_INTERVAL_SECS", "15")
                    .parse()
                    .context("Invalid POLL_INTERVAL_SECS value")?,
                gate_check_interval_secs: or_default("GATE_CHECK_INTERVAL_SECS", "300")
                    .parse()
                    .context("Invalid GATE_CHECK_INTERVAL_SECS value")?,
                gateway_grace_secs: or_default("GATEWAY_GRACE_SECS", "60")
                    .parse()
                    .context("Invalid GATEWAY_GRACE_SECS value")?,
            },
            backup: BackupConfig {
                csv_dir: PathBuf::from(or_default("CSV_BACKUP_DIR", "csv_backup")),
                db_dir: PathBuf::from(or_default("DB_BACKUP_DIR", "db_backup")),
                remote_csv_folder: or_default("REMOTE_CSV_FOLDER", "csv_backup"),
                remote_db_folder: or_default("REMOTE_DB_FOLDER", "db_backup"),
                csv_retention: or_default("CSV_RETENTION", "5")
                    .parse()
                    .context("Invalid CSV_RETENTION value")?,
            },
            reports: ReportsConfig {
                dir: lookup("REPORTS_DIR").filter(|s| !s.is_empty()).map(PathBuf::from),
                remote: or_default("REPORTS_REMOTE", "origin"),
                branch: lookup("REPORTS_BRANCH").filter(|s| !s.is_empty()),
                git_bin: or_default("GIT_BIN", "git"),
            },
            logging: LoggingConfig {
                level: or_default("LOGGING_LEVEL", "info").to_lowercase(),
                file: PathBuf::from(or_default("LOG_FILE", "container_management.log")),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.schedule.tz()?;

        if self.schedule.poll_interval_secs == 0 {
            bail!("POLL_INTERVAL_SECS must be greater than zero");
        }
        if self.schedule.gate_check_interval_secs == 0 {
            bail!("GATE_CHECK_INTERVAL_SECS must be greater than zero");
        }
        if self.backup.csv_retention == 0 {
            bail!("CSV_RETENTION must keep at least one archive");
        }

        Ok(())
    }
}
