//! Backup packaging and off-host transfer
//! Local archives are produced here and handed to the remote share

pub mod packager;
pub mod transfer;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub use packager::{BackupPackager, PackagedArchive};
pub use transfer::{BackupTransfer, TransferOutcome};

const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";
const FOLDER_TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M";

/// Backup category, each with its own naming and retention rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Csv,
    Db,
}

impl BackupKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            BackupKind::Csv => "csv_backup_",
            BackupKind::Db => "db_backup_",
        }
    }

    /// Archive extension, also the kind filter for remote pruning
    pub fn extension(&self) -> &'static str {
        match self {
            BackupKind::Csv => ".tar.gz",
            BackupKind::Db => ".tar",
        }
    }

    /// Archive file name carrying a timestamp to the second
    pub fn archive_name(&self, at: NaiveDateTime) -> String {
        format!("{}{}{}", self.prefix(), at.format(TIMESTAMP_FORMAT), self.extension())
    }

    /// Transfer time stamped into an archive name by `archive_name`, if any
    pub fn transfer_time(&self, path: &Path) -> Option<NaiveDateTime> {
        let name = path.file_name()?.to_str()?;
        let stamp = name
            .strip_prefix(self.prefix())?
            .strip_suffix(self.extension())?;
        NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
    }

    /// Is `path` an archive of this kind, judged by extension
    pub fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        match self {
            BackupKind::Csv => name.ends_with(".tar.gz"),
            BackupKind::Db => name.ends_with(".tar"),
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Csv => write!(f, "csv"),
            BackupKind::Db => write!(f, "db"),
        }
    }
}

/// Remote subdirectory holding one day's database backup
pub fn db_backup_folder_name(at: NaiveDateTime) -> String {
    format!("{}{}", BackupKind::Db.prefix(), at.format(FOLDER_TIMESTAMP_FORMAT))
}

/// Archives of `kind` directly inside `dir`, most recently modified first
pub fn local_archives(dir: &Path, kind: BackupKind) -> std::io::Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && kind.matches(&path) {
            let modified = entry.metadata()?.modified()?;
            archives.push((modified, path));
        }
    }

    archives.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(archives.into_iter().map(|(_, path)| path).collect())
}
