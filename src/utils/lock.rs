// dbbackup/src/utils/lock.rs
use chrono::Utc;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{BackupError, Result};

/// Exclusive right to run a dump, restore or delete against one database.
///
/// Backed by an advisory `flock`-style lock on `<root>/.backup-<db>.lock`, so a
/// crashed process never leaves a stale lock behind. Released on drop.
#[derive(Debug)]
pub struct OperationLock {
    file: File,
    path: PathBuf,
}

impl OperationLock {
    pub fn lock_path(root: &Path, database: &str) -> PathBuf {
        root.join(format!(".backup-{}.lock", database))
    }

    /// Takes the lock without waiting; fails with `OperationInProgress` when held elsewhere.
    pub fn acquire(root: &Path, database: &str) -> Result<Self> {
        let path = Self::lock_path(root, database);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| BackupError::filesystem(&path, e))?;

        if let Err(e) = file.try_lock_exclusive() {
            debug!("Lock {} is held elsewhere: {}", path.display(), e);
            return Err(BackupError::OperationInProgress {
                database: database.to_string(),
                lock_path: path,
            });
        }

        // Holder details are informational only; the OS lock is what counts.
        let holder = format!("pid={} started={}\n", std::process::id(), Utc::now().to_rfc3339());
        if let Err(e) = file.set_len(0).and_then(|_| file.write_all(holder.as_bytes())) {
            warn!("Could not record lock holder in {}: {}", path.display(), e);
        }

        debug!("Acquired operation lock {}", path.display());
        Ok(OperationLock { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        } else {
            debug!("Released operation lock {}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_is_rejected() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let first = OperationLock::acquire(dir.path(), "travelcrm")?;

        let second = OperationLock::acquire(dir.path(), "travelcrm");
        assert!(matches!(second, Err(BackupError::OperationInProgress { .. })));

        drop(first);
        let third = OperationLock::acquire(dir.path(), "travelcrm")?;
        assert!(third.path().ends_with(".backup-travelcrm.lock"));
        Ok(())
    }

    #[test]
    fn test_locks_are_per_database() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let _crm = OperationLock::acquire(dir.path(), "travelcrm")?;
        let _other = OperationLock::acquire(dir.path(), "analytics")?;
        Ok(())
    }
}
