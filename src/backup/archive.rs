// dbbackup/src/backup/archive.rs
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::errors::{BackupError, Result};

/// Suffix of an archive directory whose dump has not finished yet.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Size and file count of a directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryStats {
    pub size_bytes: u64,
    pub file_count: u64,
}

/// Deletes archive trees. [`ArchiveStore`] is the implementation used outside tests.
pub trait TreeRemover: Send + Sync {
    fn remove_tree(&self, path: &Path) -> Result<()>;
}

/// Filesystem side of the subsystem: the backup root and the trees below it.
#[derive(Debug, Clone)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ArchiveStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn partial_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, PARTIAL_SUFFIX))
    }

    /// Creates the backup root (and parents). Safe to call repeatedly.
    pub fn ensure_root(&self) -> Result<()> {
        if self.root.is_dir() {
            return Ok(());
        }
        match fs::create_dir_all(&self.root) {
            Ok(()) => {
                info!("Created backup root directory {}", self.root.display());
                Ok(())
            }
            // Lost a race with another creator.
            Err(e) if e.kind() == ErrorKind::AlreadyExists && self.root.is_dir() => Ok(()),
            Err(e) => Err(BackupError::filesystem(&self.root, e)),
        }
    }

    /// Sums the sizes of all regular files under `path` and counts them.
    ///
    /// Symlinks are not followed, so link cycles cannot cause endless walks
    /// and linked files are not counted.
    pub fn directory_stats(&self, path: &Path) -> Result<DirectoryStats> {
        let mut stats = DirectoryStats::default();
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|e| {
                let at = e.path().unwrap_or(path).to_path_buf();
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                BackupError::filesystem(at, source)
            })?;
            if entry.file_type().is_file() {
                let metadata = entry
                    .metadata()
                    .map_err(|e| BackupError::filesystem(entry.path(), e.into()))?;
                stats.size_bytes += metadata.len();
                stats.file_count += 1;
            }
        }
        Ok(stats)
    }

    /// Deletes `path` recursively. An already-missing path counts as success.
    pub fn remove_tree(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} already absent", path.display());
                Ok(())
            }
            Err(e) => Err(BackupError::filesystem(path, e)),
        }
    }

    /// Atomically moves a finished `.partial` directory to its final name.
    pub fn promote(&self, partial: &Path, final_path: &Path) -> Result<()> {
        fs::rename(partial, final_path).map_err(|e| BackupError::filesystem(final_path, e))
    }
}

impl TreeRemover for ArchiveStore {
    fn remove_tree(&self, path: &Path) -> Result<()> {
        ArchiveStore::remove_tree(self, path)
    }
}
