// dbbackup/src/orchestrator.rs
use std::sync::Arc;
use tracing::{info, warn};

use crate::backup::{
    Archive, ArchiveStore, BackupReport, Catalog, CatalogStats, DumpEngine, RetentionPolicy,
    RetentionSummary, owner_database,
};
use crate::config::RetentionConfig;
use crate::errors::Result;
use crate::restore::{RestoreEngine, RestoreResult};
use crate::utils::lock::OperationLock;
use crate::utils::process::{SystemToolRunner, ToolRunner};

/// Single entry point for backup, listing, pruning and restore.
///
/// Dumps, restores and deletes for the same database are mutually exclusive
/// across processes; a second caller gets `OperationInProgress`.
#[derive(Clone)]
pub struct BackupOrchestrator {
    config: RetentionConfig,
    store: ArchiveStore,
    catalog: Catalog,
    dump: DumpEngine,
    restore: RestoreEngine,
    retention: RetentionPolicy,
}

impl BackupOrchestrator {
    pub fn new(config: RetentionConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemToolRunner))
    }

    pub fn with_runner(config: RetentionConfig, runner: Arc<dyn ToolRunner>) -> Self {
        let store = ArchiveStore::new(config.backup_root.clone());
        let catalog = Catalog::new(store.clone());
        BackupOrchestrator {
            dump: DumpEngine::new(store.clone(), runner.clone()),
            restore: RestoreEngine::new(catalog.clone(), runner),
            retention: RetentionPolicy::new(catalog.clone(), store.clone()),
            catalog,
            store,
            config,
        }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn with_remover(mut self, remover: Arc<dyn crate::backup::TreeRemover>) -> Self {
        self.retention = RetentionPolicy::with_remover(self.catalog.clone(), remover);
        self
    }

    fn lock(&self, database: &str) -> Result<OperationLock> {
        self.store.ensure_root()?;
        OperationLock::acquire(self.store.root(), database)
    }

    /// Dumps the database into a new archive, then prunes this database's
    /// expired archives. The archive just written is never pruned.
    ///
    /// A failing prune is logged and does not fail the backup.
    pub async fn create_backup(&self) -> Result<BackupReport> {
        let database = self.config.database_name();
        let _lock = self.lock(&database)?;
        let mut report = self.dump.create_archive(&self.config).await?;

        match self
            .retention
            .enforce_sparing(&database, self.config.retention_days, &report.archive.name)
        {
            Ok(summary) => {
                if !summary.failed.is_empty() {
                    warn!(
                        "Retention left {} expired archive(s) in place: {}",
                        summary.failed.len(),
                        summary.failed.join(", ")
                    );
                }
                report.retention = Some(summary);
            }
            Err(e) => warn!("Retention sweep after backup {} failed: {}", report.archive.name, e),
        }
        Ok(report)
    }

    pub fn list_backups(&self) -> Result<Vec<Archive>> {
        self.catalog.list()
    }

    pub fn find_backup(&self, name: &str) -> Result<Archive> {
        self.catalog.find(name)
    }

    pub fn get_stats(&self) -> Result<CatalogStats> {
        self.catalog.stats()
    }

    /// Runs the retention sweep for the configured database on demand.
    pub fn enforce_retention(&self) -> Result<RetentionSummary> {
        let database = self.config.database_name();
        let _lock = self.lock(&database)?;
        self.retention.enforce(&database, self.config.retention_days)
    }

    /// Replaces live data with archive `name`.
    ///
    /// Callers are responsible for having obtained the operator's confirmation;
    /// see [`crate::restore::logic`] for the interactive gate.
    pub async fn restore_backup(&self, name: &str) -> Result<RestoreResult> {
        let _lock = self.lock(&self.config.database_name())?;
        self.restore.restore(&self.config, name).await
    }

    /// Removes one archive at the operator's request.
    ///
    /// Locks the database the archive was dumped from, which need not be the
    /// configured one.
    pub fn delete_backup(&self, name: &str) -> Result<Archive> {
        let owner = owner_database(name)
            .map(str::to_string)
            .unwrap_or_else(|| self.config.database_name());
        let _lock = self.lock(&owner)?;
        let archive = self.catalog.find(name)?;
        self.store.remove_tree(&archive.path)?;
        info!("Deleted backup {} ({} bytes)", archive.name, archive.size_bytes);
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::db_dump::archive_name;
    use crate::backup::testutil::{FailingRemover, make_archive};
    use crate::errors::BackupError;
    use crate::utils::process::mock::MockToolRunner;
    use chrono::{DateTime, Duration, Utc};
    use std::path::Path;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> RetentionConfig {
        RetentionConfig::new("mongodb://localhost:27017/travelcrm", root)
    }

    fn orchestrator(root: &Path, runner: Arc<MockToolRunner>) -> BackupOrchestrator {
        BackupOrchestrator::with_runner(config_for(root), runner)
    }

    fn archive_aged(root: &Path, database: &str, age: Duration, bytes: usize) -> anyhow::Result<String> {
        let created: DateTime<Utc> = Utc::now() - age;
        let name = archive_name(database, created);
        make_archive(root, &name, created, bytes)?;
        Ok(name)
    }

    #[tokio::test]
    async fn test_create_backup_then_prunes_expired() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let ancient = archive_aged(tmp.path(), "travelcrm", Duration::days(45), 500)?;
        let recent = archive_aged(tmp.path(), "travelcrm", Duration::days(2), 50)?;
        let orch = orchestrator(tmp.path(), Arc::new(MockToolRunner::dumping("travelcrm")));

        let report = orch.create_backup().await?;

        let retention = report.retention.clone().unwrap_or_default();
        assert_eq!(retention.deleted, vec![ancient]);
        assert_eq!(retention.reclaimed_bytes, 500);

        let names: Vec<String> = orch.list_backups()?.into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec![report.archive.name.clone(), recent]);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_day_retention_keeps_new_archive() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let previous = archive_aged(tmp.path(), "travelcrm", Duration::hours(1), 20)?;
        let mut config = config_for(tmp.path());
        config.retention_days = 0;
        let orch = BackupOrchestrator::with_runner(config, Arc::new(MockToolRunner::dumping("travelcrm")));

        let report = orch.create_backup().await?;

        assert!(report.archive.path.is_dir());
        let retention = report.retention.clone().unwrap_or_default();
        assert_eq!(retention.deleted, vec![previous]);
        let names: Vec<String> = orch.list_backups()?.into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec![report.archive.name.clone()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_succeeds_when_retention_cannot_delete() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let stuck = archive_aged(tmp.path(), "travelcrm", Duration::days(45), 500)?;
        let orch = orchestrator(tmp.path(), Arc::new(MockToolRunner::dumping("travelcrm")))
            .with_remover(Arc::new(FailingRemover::new(ArchiveStore::new(tmp.path()), &stuck)));

        let report = orch.create_backup().await?;

        assert!(report.archive.path.is_dir());
        let retention = report.retention.clone().unwrap_or_default();
        assert_eq!(retention.failed, vec![stuck.clone()]);
        assert_eq!(retention.deleted_count, 0);
        assert!(tmp.path().join(&stuck).is_dir());
        Ok(())
    }

    #[test]
    fn test_prune_leaves_other_database_archives() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let ours = archive_aged(tmp.path(), "travelcrm", Duration::days(60), 10)?;
        let theirs = archive_aged(tmp.path(), "analytics", Duration::days(60), 10)?;
        // a restore of analytics is running elsewhere
        let _analytics = OperationLock::acquire(tmp.path(), "analytics")?;
        let orch = orchestrator(tmp.path(), Arc::new(MockToolRunner::dumping("travelcrm")));

        let summary = orch.enforce_retention()?;

        assert_eq!(summary.deleted, vec![ours]);
        assert!(tmp.path().join(&theirs).is_dir());
        Ok(())
    }

    #[test]
    fn test_delete_waits_for_owning_database_lock() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let theirs = archive_aged(tmp.path(), "analytics", Duration::days(1), 10)?;
        let orch = orchestrator(tmp.path(), Arc::new(MockToolRunner::dumping("travelcrm")));

        let held = OperationLock::acquire(tmp.path(), "analytics")?;
        assert!(matches!(
            orch.delete_backup(&theirs),
            Err(BackupError::OperationInProgress { database, .. }) if database == "analytics"
        ));
        assert!(tmp.path().join(&theirs).is_dir());

        drop(held);
        orch.delete_backup(&theirs)?;
        assert!(!tmp.path().join(&theirs).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_backup_is_rejected() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let runner = Arc::new(MockToolRunner::dumping("travelcrm").with_delay(std::time::Duration::from_millis(300)));
        let orch = orchestrator(tmp.path(), runner.clone());

        let (first, second) = tokio::join!(orch.create_backup(), async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            orch.create_backup().await
        });

        assert!(first.is_ok());
        assert!(matches!(second, Err(BackupError::OperationInProgress { .. })));
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(orch.list_backups()?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_blocked_while_backup_runs() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let existing = archive_aged(tmp.path(), "travelcrm", Duration::hours(1), 10)?;
        let runner = Arc::new(MockToolRunner::dumping("travelcrm").with_delay(std::time::Duration::from_millis(300)));
        let orch = orchestrator(tmp.path(), runner.clone());

        let (_, restore) = tokio::join!(orch.create_backup(), async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            orch.restore_backup(&existing).await
        });

        assert!(matches!(restore, Err(BackupError::OperationInProgress { .. })));
        assert!(runner.calls().iter().all(|c| c.program == "mongodump"));
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_backup() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let path = make_archive(tmp.path(), "backup-travelcrm-x", Utc::now(), 10)?;
        let orch = orchestrator(tmp.path(), Arc::new(MockToolRunner::dumping("travelcrm")));

        let deleted = orch.delete_backup("backup-travelcrm-x")?;
        assert_eq!(deleted.size_bytes, 10);
        assert!(!path.exists());

        assert!(matches!(
            orch.delete_backup("backup-travelcrm-x"),
            Err(BackupError::ArchiveNotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_stats_after_backup() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let orch = orchestrator(tmp.path(), Arc::new(MockToolRunner::dumping("travelcrm")));
        let report = orch.create_backup().await?;

        let stats = orch.get_stats()?;
        assert_eq!(stats.count, 1);
        assert_eq!(stats.total_size_bytes, report.archive.size_bytes);
        assert_eq!(stats.average_size_bytes, report.archive.size_bytes);
        assert_eq!(stats.oldest, stats.newest);
        Ok(())
    }
}
