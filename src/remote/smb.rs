// SMB share access through the smbclient CLI
// Every command opens its own connection; a "session" holds the verified settings

use async_trait::async_trait;
use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{DirectoryOutcome, RemoteEntry, ShareConnector, ShareSession};
use crate::config::ShareConfig;
use crate::errors::{RemoteError, RemoteResult};

const COLLISION: &str = "NT_STATUS_OBJECT_NAME_COLLISION";

#[derive(Debug, Clone)]
pub struct SmbConnector {
    config: ShareConfig,
}

impl SmbConnector {
    pub fn new(config: ShareConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ShareConnector for SmbConnector {
    async fn connect(&self) -> RemoteResult<Box<dyn ShareSession>> {
        debug!(
            user = %self.config.user,
            remote_name = %self.config.remote_name,
            ip = %self.config.server_ip,
            port = self.config.port,
            "Connecting to samba share"
        );

        let session = SmbSession {
            config: self.config.clone(),
        };
        session
            .run("ls")
            .await
            .map_err(|e| RemoteError::Connect(e.to_string()))?;

        Ok(Box::new(session))
    }
}

#[derive(Debug, Clone)]
pub struct SmbSession {
    config: ShareConfig,
}

impl SmbSession {
    fn service(&self) -> String {
        format!("//{}/{}", self.config.remote_name, self.config.share)
    }

    /// Run one smbclient command, failing on a non-zero exit or any NT status error
    async fn run(&self, command: &str) -> Result<String, String> {
        let output = Command::new(&self.config.smbclient_bin)
            .arg(self.service())
            .args(["-I", &self.config.server_ip])
            .args(["-p", &self.config.port.to_string()])
            .args(["-U", &self.config.user])
            .args(["-c", command])
            .env("PASSWD", &self.config.password)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("cannot run '{}': {}", self.config.smbclient_bin, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Some(status) = nt_status_error(&stdout).or_else(|| nt_status_error(&stderr)) {
            return Err(status);
        }
        if !output.status.success() {
            return Err(format!("smbclient exited with {}: {}", output.status, stderr.trim()));
        }

        Ok(stdout)
    }
}

#[async_trait]
impl ShareSession for SmbSession {
    async fn store(&self, remote_path: &str, local_file: &Path) -> RemoteResult<u64> {
        let bytes = tokio::fs::metadata(local_file).await?.len();
        let command = format!(
            "put \"{}\" \"{}\"",
            local_file.display(),
            to_smb_path(remote_path)
        );

        self.run(&command)
            .await
            .map_err(|message| RemoteError::Transfer {
                path: remote_path.to_string(),
                message,
            })?;

        Ok(bytes)
    }

    async fn list(&self, remote_folder: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let pattern = if remote_folder.trim_matches('/').is_empty() {
            "*".to_string()
        } else {
            format!("{}\\*", to_smb_path(remote_folder))
        };

        let stdout = self
            .run(&format!("ls \"{}\"", pattern))
            .await
            .map_err(|message| RemoteError::Listing {
                path: remote_folder.to_string(),
                message,
            })?;

        Ok(parse_listing(&stdout))
    }

    async fn delete(&self, remote_path: &str) -> RemoteResult<()> {
        self.run(&format!("del \"{}\"", to_smb_path(remote_path)))
            .await
            .map(|_| ())
            .map_err(|message| RemoteError::Delete {
                path: remote_path.to_string(),
                message,
            })
    }

    async fn mkdir(&self, remote_path: &str) -> RemoteResult<DirectoryOutcome> {
        match self
            .run(&format!("mkdir \"{}\"", to_smb_path(remote_path)))
            .await
        {
            Ok(_) => Ok(DirectoryOutcome::Created),
            Err(message) if message.contains(COLLISION) => Ok(DirectoryOutcome::AlreadyExists),
            Err(message) => Ok(DirectoryOutcome::Failed(message)),
        }
    }
}

fn to_smb_path(path: &str) -> String {
    path.trim_matches('/').replace('/', "\\")
}

/// First `NT_STATUS_*` error token in smbclient output, if any
fn nt_status_error(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|token| token.starts_with("NT_STATUS_") && *token != "NT_STATUS_OK")
        .map(|token| token.trim_end_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_').to_string())
}

lazy_static! {
    /// One `smbclient ls` entry: name, attributes, size, modification date
    static ref LISTING_LINE: Regex = Regex::new(
        r"^\s+(?P<name>.+?)\s+(?P<attrs>[A-Z]*)\s+(?P<size>\d+)\s+(?P<date>[A-Z][a-z]{2}\s+[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+\d{4})\s*$"
    ).expect("Failed to compile LISTING_LINE regex - this is a bug in the hardcoded pattern");
}

/// Parse `smbclient ls` output. The listing reports modification time,
/// which is the creation time for write-once archives.
pub fn parse_listing(stdout: &str) -> Vec<RemoteEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let caps = LISTING_LINE.captures(line)?;
            let filename = caps["name"].trim().to_string();
            if filename == "." || filename == ".." {
                return None;
            }

            let date = caps["date"].split_whitespace().collect::<Vec<_>>().join(" ");
            let create_time = NaiveDateTime::parse_from_str(&date, "%a %b %d %H:%M:%S %Y").ok()?;

            Some(RemoteEntry {
                filename,
                create_time,
                is_directory: caps["attrs"].contains('D'),
            })
        })
        .collect()
}
