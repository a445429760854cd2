// dbbackup/src/backup/catalog.rs
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::archive::{ArchiveStore, PARTIAL_SUFFIX};
use crate::errors::{BackupError, Result};

/// Directory-name prefix that marks an entry of the backup root as an archive.
pub const ARCHIVE_PREFIX: &str = "backup-";

const MOST_RECENT_LIMIT: usize = 10;

// `backup-<database>-<YYYY-MM-DDTHH-MM-SS-mmmZ>`
static ARCHIVE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^backup-(.+)-\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}-\d{3}Z$")
        .expect("static regex is valid")
});

/// A completed backup. Everything here is derived from the filesystem on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub file_count: u64,
    pub created_at: DateTime<Utc>,
    /// Whole days between `created_at` and the time of the scan.
    pub age_days: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CatalogStats {
    pub count: usize,
    pub total_size_bytes: u64,
    pub total_file_count: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub average_size_bytes: u64,
    /// Up to ten archives, newest first.
    pub most_recent: Vec<Archive>,
}

pub fn is_archive_name(name: &str) -> bool {
    name.starts_with(ARCHIVE_PREFIX) && !name.ends_with(PARTIAL_SUFFIX)
}

/// Database an archive was dumped from, read back from its generated name.
/// `None` for names the dump engine did not produce.
pub fn owner_database(name: &str) -> Option<&str> {
    ARCHIVE_NAME
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[derive(Debug, Clone)]
pub struct Catalog {
    store: ArchiveStore,
}

impl Catalog {
    pub fn new(store: ArchiveStore) -> Self {
        Catalog { store }
    }

    pub fn list(&self) -> Result<Vec<Archive>> {
        self.list_at(Utc::now())
    }

    /// Scans the backup root and returns every complete archive, newest first.
    pub fn list_at(&self, now: DateTime<Utc>) -> Result<Vec<Archive>> {
        self.store.ensure_root()?;
        let root = self.store.root();
        let entries = fs::read_dir(root).map_err(|e| BackupError::filesystem(root, e))?;

        let mut archives = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::filesystem(root, e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_archive_name(&name) {
                continue;
            }
            let path = entry.path();
            let metadata = match fs::symlink_metadata(&path) {
                Ok(m) => m,
                // Removed between read_dir and stat, e.g. by a concurrent prune.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(BackupError::filesystem(&path, e)),
            };
            if !metadata.is_dir() {
                debug!("Skipping non-directory {}", path.display());
                continue;
            }

            let created_at: DateTime<Utc> = metadata
                .modified()
                .map_err(|e| BackupError::filesystem(&path, e))?
                .into();
            let stats = match self.store.directory_stats(&path) {
                Ok(stats) => stats,
                Err(BackupError::Filesystem { source, .. }) if source.kind() == ErrorKind::NotFound => {
                    warn!("Archive {} disappeared while scanning", name);
                    continue;
                }
                Err(e) => return Err(e),
            };

            archives.push(Archive {
                name,
                path,
                size_bytes: stats.size_bytes,
                file_count: stats.file_count,
                created_at,
                age_days: (now - created_at).num_days().max(0),
            });
        }

        archives.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(archives)
    }

    pub fn find(&self, name: &str) -> Result<Archive> {
        self.find_at(name, Utc::now())
    }

    pub fn find_at(&self, name: &str, now: DateTime<Utc>) -> Result<Archive> {
        self.list_at(now)?
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| BackupError::ArchiveNotFound(name.to_string()))
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> Result<CatalogStats> {
        Ok(summarize(self.list_at(now)?))
    }
}

/// Aggregates a newest-first archive list.
pub fn summarize(archives: Vec<Archive>) -> CatalogStats {
    let count = archives.len();
    let total_size_bytes: u64 = archives.iter().map(|a| a.size_bytes).sum();
    let total_file_count: u64 = archives.iter().map(|a| a.file_count).sum();
    let average_size_bytes = if count == 0 {
        0
    } else {
        total_size_bytes / count as u64
    };

    CatalogStats {
        count,
        total_size_bytes,
        total_file_count,
        newest: archives.first().map(|a| a.created_at),
        oldest: archives.last().map(|a| a.created_at),
        average_size_bytes,
        most_recent: archives.into_iter().take(MOST_RECENT_LIMIT).collect(),
    }
}
