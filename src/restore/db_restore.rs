// dbbackup/src/restore/db_restore.rs
use chrono::{DateTime, Utc};
use regex::Regex;
use std::io::ErrorKind;
use std::sync::{Arc, LazyLock};
use tracing::{info, warn};

use crate::backup::Catalog;
use crate::backup::db_dump::{log_diagnostics, stderr_tail};
use crate::config::RetentionConfig;
use crate::errors::{BackupError, Result};
use crate::utils::process::{ToolInvocation, ToolRunner};

static RESTORE_COMPLETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(finished restoring|document\(s\) restored successfully)")
        .expect("static regex is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreResult {
    pub name: String,
    pub completed_at: DateTime<Utc>,
}

/// Replaces the live database with the contents of an archive.
#[derive(Clone)]
pub struct RestoreEngine {
    catalog: Catalog,
    runner: Arc<dyn ToolRunner>,
}

impl RestoreEngine {
    pub fn new(catalog: Catalog, runner: Arc<dyn ToolRunner>) -> Self {
        RestoreEngine { catalog, runner }
    }

    /// Drops and reloads every collection of the configured database from `name`.
    ///
    /// The archive is looked up before anything is launched, so an unknown
    /// name never reaches the restore tool.
    pub async fn restore(&self, config: &RetentionConfig, name: &str) -> Result<RestoreResult> {
        let archive = self.catalog.find(name)?;
        let database = config.database_name();

        // The dump tool nests its output by database name.
        let source = archive.path.join(&database);
        if !source.is_dir() {
            return Err(BackupError::filesystem(
                &source,
                std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("archive {} has no dump of database '{}'", name, database),
                ),
            ));
        }

        warn!(
            "Restoring {} over live database '{}'; existing collections will be dropped",
            name, database
        );
        let invocation = ToolInvocation::new(&config.restore_tool)
            .arg(format!("--uri={}", config.connection_uri))
            .arg("--drop")
            .arg("--gzip")
            .arg(format!("--dir={}", source.display()));

        let output = self.runner.run(&invocation, config.tool_timeout).await?;
        log_diagnostics(&config.restore_tool, &output, &RESTORE_COMPLETED);
        if !output.is_success() {
            return Err(BackupError::RestoreFailed {
                exit_code: output.exit_code,
                stderr: stderr_tail(&output.stderr, 20),
            });
        }

        let completed_at = Utc::now();
        info!("Restore of {} into '{}' completed", name, database);
        Ok(RestoreResult {
            name: archive.name,
            completed_at,
        })
    }
}
