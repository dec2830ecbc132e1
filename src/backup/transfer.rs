// Backup transfer flows
// Package (csv) or pick up (db) a local archive and move it to the remote share

use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::{db_backup_folder_name, local_archives, BackupKind, BackupPackager};
use crate::config::BackupConfig;
use crate::errors::TransferError;
use crate::remote::{join_remote, RemoteArchiveClient, ShareConnector, UploadOutcome};

/// Subdirectory of the db backup dir holding dumps that lost an ambiguous selection
pub const SET_ASIDE_DIR: &str = "set_aside";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Uploaded {
        kind: BackupKind,
        archive: PathBuf,
        remote_folder: String,
        bytes: u64,
        pruned: Vec<String>,
        /// Archives left over from earlier failed uploads that went up this time
        retried: Vec<PathBuf>,
    },
    /// The archive stays on local disk for a later attempt
    UploadFailed {
        kind: BackupKind,
        archive: PathBuf,
        retried: Vec<PathBuf>,
    },
    NothingToTransfer {
        kind: BackupKind,
        retried: Vec<PathBuf>,
    },
}

/// More than one database archive was found where exactly one was expected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousArchiveSet {
    pub chosen: PathBuf,
    pub ignored: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSelection {
    None,
    Single(PathBuf),
    Ambiguous(AmbiguousArchiveSet),
}

impl ArchiveSelection {
    pub fn chosen(&self) -> Option<&Path> {
        match self {
            ArchiveSelection::None => None,
            ArchiveSelection::Single(path) => Some(path),
            ArchiveSelection::Ambiguous(set) => Some(&set.chosen),
        }
    }
}

/// Most recently produced database dump in `dir`. Archives already stamped
/// with a transfer time are leftovers, not fresh dumps, and are never selected.
pub fn select_db_archive(dir: &Path) -> std::io::Result<ArchiveSelection> {
    let mut archives = local_archives(dir, BackupKind::Db)?
        .into_iter()
        .filter(|path| BackupKind::Db.transfer_time(path).is_none());

    Ok(match archives.next() {
        None => ArchiveSelection::None,
        Some(chosen) => {
            let ignored: Vec<PathBuf> = archives.collect();
            if ignored.is_empty() {
                ArchiveSelection::Single(chosen)
            } else {
                ArchiveSelection::Ambiguous(AmbiguousArchiveSet { chosen, ignored })
            }
        }
    })
}

/// Stamped database archives in `dir` whose upload failed earlier, oldest first
pub fn pending_db_archives(dir: &Path) -> std::io::Result<Vec<(PathBuf, NaiveDateTime)>> {
    let mut pending: Vec<(PathBuf, NaiveDateTime)> = local_archives(dir, BackupKind::Db)?
        .into_iter()
        .filter_map(|path| BackupKind::Db.transfer_time(&path).map(|at| (path, at)))
        .collect();
    pending.sort_by_key(|(_, at)| *at);
    Ok(pending)
}

pub struct BackupTransfer {
    connector: Arc<dyn ShareConnector>,
    packager: BackupPackager,
    config: BackupConfig,
    tz: Tz,
}

impl BackupTransfer {
    /// Archive names and remote folders are stamped with wall-clock time in `tz`
    pub fn new(connector: Arc<dyn ShareConnector>, config: BackupConfig, tz: Tz) -> Self {
        Self {
            connector,
            packager: BackupPackager::new(),
            config,
            tz,
        }
    }

    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }

    pub async fn transfer(&self, kind: BackupKind) -> Result<TransferOutcome, TransferError> {
        self.transfer_at(kind, self.now()).await
    }

    /// Transfer one kind of backup, stamping names with the venue time `at`
    pub async fn transfer_at(
        &self,
        kind: BackupKind,
        at: NaiveDateTime,
    ) -> Result<TransferOutcome, TransferError> {
        match kind {
            BackupKind::Csv => self.transfer_csv_at(at).await,
            BackupKind::Db => self.transfer_db_at(at).await,
        }
    }

    async fn connect(&self) -> Result<RemoteArchiveClient, TransferError> {
        let mut client = RemoteArchiveClient::new(self.connector.clone());
        if client.connect().await {
            Ok(client)
        } else {
            Err(TransferError::RemoteConnectFailure)
        }
    }

    pub async fn transfer_csv(&self) -> Result<TransferOutcome, TransferError> {
        self.transfer_csv_at(self.now()).await
    }

    /// Package the csv backup tree, upload it, keep the most recent archives
    /// remotely and clear the packaged data for the next day.
    pub async fn transfer_csv_at(&self, at: NaiveDateTime) -> Result<TransferOutcome, TransferError> {
        info!(dir = %self.config.csv_dir.display(), "📦 Moving csv backup to remote share");
        let client = self.connect().await?;

        let dir = self.config.csv_dir.clone();
        let packager = self.packager;
        let packaged = tokio::task::spawn_blocking(move || {
            packager.prune_local(&dir)?;
            packager.package_at(&dir, at)
        })
        .await
        .map_err(|e| TransferError::Packaging(anyhow::anyhow!("packaging task failed: {e}")))??;
        let archive = packaged.archive;

        // An empty package must never take a remote retention slot
        if packaged.files == 0 {
            warn!(dir = %self.config.csv_dir.display(), "No csv files to back up, skipping upload");
            fs::remove_file(&archive)?;
            return Ok(TransferOutcome::NothingToTransfer {
                kind: BackupKind::Csv,
                retried: Vec::new(),
            });
        }

        let remote_folder = self.config.remote_csv_folder.clone();
        let bytes = match client.upload(&archive, &remote_folder).await {
            UploadOutcome::Uploaded { bytes } => bytes,
            UploadOutcome::Failed => {
                return Ok(TransferOutcome::UploadFailed {
                    kind: BackupKind::Csv,
                    archive,
                    retried: Vec::new(),
                })
            }
        };

        let pruned = match client
            .prune_to_most_recent(
                &remote_folder,
                self.config.csv_retention,
                BackupKind::Csv.extension(),
            )
            .await
        {
            Ok(pruned) => pruned,
            Err(e) => {
                warn!(folder = %remote_folder, error = %e, "Could not prune old csv backups on remote share");
                Vec::new()
            }
        };

        let removed = remove_packaged_sources(&self.config.csv_dir)?;
        info!(removed, "Deleted backed up csv files");

        Ok(TransferOutcome::Uploaded {
            kind: BackupKind::Csv,
            archive,
            remote_folder,
            bytes,
            pruned,
            retried: Vec::new(),
        })
    }

    pub async fn transfer_db(&self) -> Result<TransferOutcome, TransferError> {
        self.transfer_db_at(self.now()).await
    }

    /// Move the database dump into a fresh remote subdirectory named after
    /// `now`. Archives left behind by earlier failed uploads go first, each
    /// into the subdirectory of its own stamp. Older remote subdirectories
    /// are never touched.
    pub async fn transfer_db_at(&self, now: NaiveDateTime) -> Result<TransferOutcome, TransferError> {
        info!(dir = %self.config.db_dir.display(), "📦 Moving db backup to remote share");
        let client = self.connect().await?;

        let retried = self.retry_pending_db(&client).await?;

        let selection = select_db_archive(&self.config.db_dir)?;
        let produced = match &selection {
            ArchiveSelection::None => {
                error!(dir = %self.config.db_dir.display(), "No db backup archive found, nothing to move");
                return Ok(TransferOutcome::NothingToTransfer {
                    kind: BackupKind::Db,
                    retried,
                });
            }
            ArchiveSelection::Single(path) => path.clone(),
            ArchiveSelection::Ambiguous(set) => {
                warn!(
                    chosen = %set.chosen.display(),
                    ignored = ?set.ignored,
                    "Expected exactly one db backup archive, moving the most recent"
                );
                self.set_aside(&set.ignored)?;
                set.chosen.clone()
            }
        };

        let archive = self.config.db_dir.join(BackupKind::Db.archive_name(now));
        fs::rename(&produced, &archive)?;
        debug!(from = %produced.display(), to = %archive.display(), "Renamed db archive to transfer time");

        match self.upload_db(&client, &archive, now).await? {
            Some((remote_folder, bytes)) => Ok(TransferOutcome::Uploaded {
                kind: BackupKind::Db,
                archive,
                remote_folder,
                bytes,
                pruned: Vec::new(),
                retried,
            }),
            None => Ok(TransferOutcome::UploadFailed {
                kind: BackupKind::Db,
                archive,
                retried,
            }),
        }
    }

    /// Upload stamped archives that a failed upload left behind, keeping their names
    async fn retry_pending_db(&self, client: &RemoteArchiveClient) -> Result<Vec<PathBuf>, TransferError> {
        let mut retried = Vec::new();

        for (archive, stamped_at) in pending_db_archives(&self.config.db_dir)? {
            warn!(archive = %archive.display(), "Retrying db backup left by an earlier failed upload");
            if self.upload_db(client, &archive, stamped_at).await?.is_some() {
                retried.push(archive);
            }
        }

        Ok(retried)
    }

    /// Upload a stamped archive into the remote subdirectory for `stamped_at`
    /// and delete it locally. `None` means the upload failed and the file stays.
    async fn upload_db(
        &self,
        client: &RemoteArchiveClient,
        archive: &Path,
        stamped_at: NaiveDateTime,
    ) -> Result<Option<(String, u64)>, TransferError> {
        let folder_name = db_backup_folder_name(stamped_at);
        client
            .create_directory(&folder_name, &self.config.remote_db_folder)
            .await;
        let remote_folder = join_remote(&self.config.remote_db_folder, &folder_name);

        match client.upload(archive, &remote_folder).await {
            UploadOutcome::Uploaded { bytes } => {
                fs::remove_file(archive)?;
                debug!(path = %archive.display(), "Deleted local db archive after upload");
                Ok(Some((remote_folder, bytes)))
            }
            UploadOutcome::Failed => Ok(None),
        }
    }

    /// Move dumps that lost an ambiguous selection out of the way so a later
    /// transfer cannot publish them under the wrong date.
    fn set_aside(&self, ignored: &[PathBuf]) -> std::io::Result<()> {
        let aside = self.config.db_dir.join(SET_ASIDE_DIR);
        fs::create_dir_all(&aside)?;

        for path in ignored {
            if let Some(name) = path.file_name() {
                fs::rename(path, aside.join(name))?;
                warn!(path = %path.display(), to = %aside.display(), "Set aside unselected db archive");
            }
        }
        Ok(())
    }
}

/// Delete csv files below the subdirectories of `dir`, the ones that were packaged
fn remove_packaged_sources(dir: &Path) -> std::io::Result<usize> {
    let mut removed = 0;

    for entry in WalkDir::new(dir).min_depth(2).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        let is_csv = path.extension().map(|ext| ext == "csv").unwrap_or(false);
        if entry.file_type().is_file() && is_csv {
            fs::remove_file(path)?;
            removed += 1;
        }
    }

    Ok(removed)
}
