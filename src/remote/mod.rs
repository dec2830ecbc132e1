//! Remote archive share
//! Session management, upload and retention pruning on the off-host file share

pub mod smb;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::errors::{RemoteError, RemoteResult};

pub use smb::{SmbConnector, SmbSession};

/// A file or directory observed on the share. The share owns these; they
/// are only ranked locally, never changed except by deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub filename: String,
    pub create_time: NaiveDateTime,
    pub is_directory: bool,
}

/// Result of a directory creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryOutcome {
    Created,
    AlreadyExists,
    Failed(String),
}

impl DirectoryOutcome {
    /// Created or already there
    pub fn is_usable(&self) -> bool {
        !matches!(self, DirectoryOutcome::Failed(_))
    }
}

/// Upload failures are logged and swallowed; callers only learn whether the
/// archive made it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { bytes: u64 },
    Failed,
}

impl UploadOutcome {
    pub fn is_uploaded(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded { .. })
    }
}

/// Opens sessions with the share
#[async_trait]
pub trait ShareConnector: Send + Sync {
    async fn connect(&self) -> RemoteResult<Box<dyn ShareSession>>;
}

/// Protocol-level operations of an open session. Paths are relative to the
/// share root and use `/` separators.
#[async_trait]
pub trait ShareSession: Send + Sync {
    /// Store a local file at `remote_path`, returning bytes written
    async fn store(&self, remote_path: &str, local_file: &Path) -> RemoteResult<u64>;

    async fn list(&self, remote_folder: &str) -> RemoteResult<Vec<RemoteEntry>>;

    async fn delete(&self, remote_path: &str) -> RemoteResult<()>;

    async fn mkdir(&self, remote_path: &str) -> RemoteResult<DirectoryOutcome>;
}

pub fn join_remote(folder: &str, name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Pick the entries to delete so that the `keep` most recent files matching
/// `kind_filter` remain. Directories and non-matching files are never
/// selected. Equal creation times rank by filename, later name first.
pub fn select_stale(entries: &[RemoteEntry], keep: usize, kind_filter: &str) -> Vec<RemoteEntry> {
    let mut matching: Vec<&RemoteEntry> = entries
        .iter()
        .filter(|e| !e.is_directory && e.filename.ends_with(kind_filter))
        .collect();

    matching.sort_by(|a, b| {
        b.create_time
            .cmp(&a.create_time)
            .then_with(|| b.filename.cmp(&a.filename))
    });

    matching.into_iter().skip(keep).cloned().collect()
}

pub struct RemoteArchiveClient {
    connector: Arc<dyn ShareConnector>,
    session: Option<Box<dyn ShareSession>>,
}

impl RemoteArchiveClient {
    pub fn new(connector: Arc<dyn ShareConnector>) -> Self {
        Self {
            connector,
            session: None,
        }
    }

    /// Open a session. Failure is logged at critical severity and reported as
    /// `false` so callers can skip the transfer without aborting.
    pub async fn connect(&mut self) -> bool {
        match self.connector.connect().await {
            Ok(session) => {
                info!("Connected to remote share");
                self.session = Some(session);
                true
            }
            Err(e) => {
                error!(severity = "critical", error = %e, "Failed to connect to remote share, could not move backups to external storage");
                self.session = None;
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn session(&self) -> RemoteResult<&dyn ShareSession> {
        self.session.as_deref().ok_or(RemoteError::NotConnected)
    }

    /// Upload `local_file` into `remote_folder` under its own file name
    pub async fn upload(&self, local_file: &Path, remote_folder: &str) -> UploadOutcome {
        let Some(file_name) = local_file.file_name().map(|n| n.to_string_lossy().to_string()) else {
            error!(path = %local_file.display(), "Upload source has no file name");
            return UploadOutcome::Failed;
        };
        let remote_path = join_remote(remote_folder, &file_name);

        let result = match self.session() {
            Ok(session) => session.store(&remote_path, local_file).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(bytes) => {
                info!(local = %local_file.display(), remote = %remote_path, bytes, "Uploaded archive to remote share");
                UploadOutcome::Uploaded { bytes }
            }
            Err(e) => {
                error!(local = %local_file.display(), remote = %remote_path, error = %e, "Upload to remote share failed, archive kept locally");
                UploadOutcome::Failed
            }
        }
    }

    /// Best-effort delete
    pub async fn delete(&self, remote_path: &str) -> bool {
        let result = match self.session() {
            Ok(session) => session.delete(remote_path).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!(path = %remote_path, "Deleted remote file");
                true
            }
            Err(e) => {
                warn!(path = %remote_path, error = %e, "Could not delete remote file");
                false
            }
        }
    }

    /// Create `parent/name`. The share does not reliably tell "exists" from
    /// other failures, so only an explicit collision counts as already-exists.
    pub async fn create_directory(&self, name: &str, parent: &str) -> DirectoryOutcome {
        let remote_path = join_remote(parent, name);

        let outcome = match self.session() {
            Ok(session) => match session.mkdir(&remote_path).await {
                Ok(outcome) => outcome,
                Err(e) => DirectoryOutcome::Failed(e.to_string()),
            },
            Err(e) => DirectoryOutcome::Failed(e.to_string()),
        };

        match &outcome {
            DirectoryOutcome::Created => info!(path = %remote_path, "Created remote directory"),
            DirectoryOutcome::AlreadyExists => {
                debug!(path = %remote_path, "Remote directory already exists")
            }
            DirectoryOutcome::Failed(message) => {
                warn!(path = %remote_path, error = %message, "Could not create remote directory")
            }
        }

        outcome
    }

    pub async fn list(&self, remote_folder: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let entries = self.session()?.list(remote_folder).await?;
        debug!(folder = %remote_folder, count = entries.len(), "Listed remote folder");
        Ok(entries)
    }

    /// Keep the `keep` most recent files matching `kind_filter` in
    /// `remote_folder`, delete the other matching files. Returns the names
    /// that were deleted.
    pub async fn prune_to_most_recent(
        &self,
        remote_folder: &str,
        keep: usize,
        kind_filter: &str,
    ) -> RemoteResult<Vec<String>> {
        let entries = self.list(remote_folder).await?;
        let stale = select_stale(&entries, keep, kind_filter);

        let mut deleted = Vec::new();
        for entry in stale {
            if self.delete(&join_remote(remote_folder, &entry.filename)).await {
                info!(file = %entry.filename, folder = %remote_folder, "Pruned old backup from remote share");
                deleted.push(entry.filename);
            }
        }

        Ok(deleted)
    }
}
