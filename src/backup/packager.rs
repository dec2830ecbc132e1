use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use flate2::{write::GzEncoder, Compression};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::Builder;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{local_archives, BackupKind};

/// A freshly written archive and how many files went into it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    pub archive: PathBuf,
    pub files: usize,
}

/// Builds the compressed archive of a backup directory.
///
/// Only immediate subdirectories (one per data source) are packaged, files
/// lying directly in the directory are left out.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupPackager;

impl BackupPackager {
    pub fn new() -> Self {
        Self
    }

    /// Delete every compressed archive directly in `dir`. Returns how many were removed.
    pub fn prune_local(&self, dir: &Path) -> Result<usize> {
        let stale = local_archives(dir, BackupKind::Csv)
            .with_context(|| format!("Cannot list archives in {}", dir.display()))?;

        if stale.is_empty() {
            debug!(dir = %dir.display(), "No stale local archives to delete");
        }

        for path in &stale {
            fs::remove_file(path)
                .with_context(|| format!("Cannot delete old archive {}", path.display()))?;
            info!(path = %path.display(), "Old local archive deleted");
        }

        Ok(stale.len())
    }

    /// Package `dir` into a new archive named after `at` (venue time)
    pub fn package_at(&self, dir: &Path, at: NaiveDateTime) -> Result<PackagedArchive> {
        if !dir.is_dir() {
            bail!("Backup directory doesn't exist: {}", dir.display());
        }

        let archive_path = dir.join(BackupKind::Csv.archive_name(at));
        let file = File::create(&archive_path)
            .with_context(|| format!("Cannot create archive {}", archive_path.display()))?;
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

        let mut sources: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect();
        sources.sort();

        let mut files = 0usize;
        for source in &sources {
            files += append_tree(&mut builder, dir, source)?;
        }

        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .with_context(|| format!("Cannot finish archive {}", archive_path.display()))?;

        info!(
            archive = %archive_path.display(),
            sources = sources.len(),
            files,
            "Packaged backup directory"
        );

        Ok(PackagedArchive {
            archive: archive_path,
            files,
        })
    }
}

/// Append `source` recursively, entries named relative to `root`
fn append_tree<W: std::io::Write>(builder: &mut Builder<W>, root: &Path, source: &Path) -> Result<usize> {
    let mut files = 0;

    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry while packaging: {err}");
                continue;
            }
        };

        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };

        if entry.file_type().is_dir() {
            builder
                .append_dir(relative, path)
                .with_context(|| format!("Cannot add directory {}", path.display()))?;
        } else if entry.file_type().is_file() {
            builder
                .append_path_with_name(path, relative)
                .with_context(|| format!("Cannot add file {}", path.display()))?;
            files += 1;
        } else {
            debug!(path = %path.display(), "Skipping non-regular file");
        }
    }

    Ok(files)
}
