//! Creating, cataloguing and pruning dump archives.

pub mod archive;
pub mod catalog;
pub mod db_dump;
pub mod retention;

pub use archive::{ArchiveStore, DirectoryStats, TreeRemover};
pub use catalog::{Archive, Catalog, CatalogStats, owner_database};
pub use db_dump::{BackupReport, DumpEngine};
pub use retention::{RetentionPolicy, RetentionSummary};

#[cfg(test)]
pub(crate) mod testutil {
    use chrono::{DateTime, Utc};
    use std::fs::{self, File};
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};

    use super::{ArchiveStore, TreeRemover};
    use crate::errors::{BackupError, Result};

    /// Sets a directory's modification time, which the catalog reports as `created_at`.
    pub(crate) fn set_created_at(path: &Path, created_at: DateTime<Utc>) -> std::io::Result<()> {
        File::open(path)?.set_modified(created_at.into())
    }

    /// Lays out an archive the way the dump tool does: `<root>/<name>/travelcrm/*`.
    /// Holds one file of `bytes` bytes and one empty metadata file.
    pub(crate) fn make_archive(
        root: &Path,
        name: &str,
        created_at: DateTime<Utc>,
        bytes: usize,
    ) -> std::io::Result<PathBuf> {
        let path = root.join(name);
        let db_dir = path.join("travelcrm");
        fs::create_dir_all(&db_dir)?;
        fs::write(db_dir.join("bookings.bson.gz"), vec![7u8; bytes])?;
        fs::write(db_dir.join("bookings.metadata.json.gz"), b"")?;
        set_created_at(&path, created_at)?;
        Ok(path)
    }

    /// Removes trees like [`ArchiveStore`] except the archive named `stuck`,
    /// which always fails as if it sat on a read-only mount.
    pub(crate) struct FailingRemover {
        store: ArchiveStore,
        stuck: String,
    }

    impl FailingRemover {
        pub(crate) fn new(store: ArchiveStore, stuck: &str) -> Self {
            FailingRemover {
                store,
                stuck: stuck.to_string(),
            }
        }
    }

    impl TreeRemover for FailingRemover {
        fn remove_tree(&self, path: &Path) -> Result<()> {
            if path.file_name().is_some_and(|n| n == self.stuck.as_str()) {
                return Err(BackupError::filesystem(
                    path,
                    std::io::Error::new(ErrorKind::PermissionDenied, "read-only file system"),
                ));
            }
            self.store.remove_tree(path)
        }
    }
}
