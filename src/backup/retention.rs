// dbbackup/src/backup/retention.rs
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::archive::{ArchiveStore, TreeRemover};
use super::catalog::{Catalog, owner_database};
use crate::errors::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionSummary {
    pub deleted_count: usize,
    pub reclaimed_bytes: u64,
    pub deleted: Vec<String>,
    /// Archives that qualified for deletion but could not be removed.
    pub failed: Vec<String>,
}

/// Deletes one database's archives once they reach the configured age.
///
/// Archives of other databases sharing the backup root are never touched;
/// their lifecycle belongs to whoever holds that database's lock.
#[derive(Clone)]
pub struct RetentionPolicy {
    catalog: Catalog,
    remover: Arc<dyn TreeRemover>,
}

impl RetentionPolicy {
    pub fn new(catalog: Catalog, store: ArchiveStore) -> Self {
        Self::with_remover(catalog, Arc::new(store))
    }

    pub fn with_remover(catalog: Catalog, remover: Arc<dyn TreeRemover>) -> Self {
        RetentionPolicy { catalog, remover }
    }

    pub fn enforce(&self, database: &str, retention_days: u32) -> Result<RetentionSummary> {
        self.sweep(database, retention_days, Utc::now(), None)
    }

    /// Like [`enforce`](Self::enforce), but never deletes the archive named `keep`.
    pub fn enforce_sparing(&self, database: &str, retention_days: u32, keep: &str) -> Result<RetentionSummary> {
        self.sweep(database, retention_days, Utc::now(), Some(keep))
    }

    pub fn enforce_at(&self, database: &str, retention_days: u32, now: DateTime<Utc>) -> Result<RetentionSummary> {
        self.sweep(database, retention_days, now, None)
    }

    /// Removes every archive of `database` whose age in whole days is at least
    /// `retention_days`.
    ///
    /// A failed deletion is logged and skipped; only removed archives are
    /// counted in the summary. Failing to list the catalog is an error.
    fn sweep(
        &self,
        database: &str,
        retention_days: u32,
        now: DateTime<Utc>,
        keep: Option<&str>,
    ) -> Result<RetentionSummary> {
        let mut summary = RetentionSummary::default();
        let threshold = i64::from(retention_days);

        for archive in self.catalog.list_at(now)? {
            if archive.age_days < threshold || owner_database(&archive.name) != Some(database) {
                continue;
            }
            if keep == Some(archive.name.as_str()) {
                debug!("Keeping {}: it is the archive just created", archive.name);
                continue;
            }
            match self.remover.remove_tree(&archive.path) {
                Ok(()) => {
                    info!(
                        "Deleted expired backup {} ({} days old, {} bytes)",
                        archive.name, archive.age_days, archive.size_bytes
                    );
                    summary.deleted_count += 1;
                    summary.reclaimed_bytes += archive.size_bytes;
                    summary.deleted.push(archive.name);
                }
                Err(e) => {
                    error!("Failed to delete expired backup {}: {}", archive.name, e);
                    summary.failed.push(archive.name);
                }
            }
        }

        if summary.deleted_count > 0 {
            info!(
                "Retention for '{}' ({} days): removed {} archive(s), reclaimed {} bytes",
                database, retention_days, summary.deleted_count, summary.reclaimed_bytes
            );
        }
        Ok(summary)
    }
}
