// dbbackup/src/backup/db_dump.rs
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::archive::ArchiveStore;
use super::catalog::{ARCHIVE_PREFIX, Archive};
use super::retention::RetentionSummary;
use crate::config::RetentionConfig;
use crate::errors::{BackupError, Result};
use crate::utils::process::{ToolInvocation, ToolOutput, ToolRunner};

static DUMP_COMPLETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)done dumping").expect("static regex is valid"));

const NAME_CLAIM_ATTEMPTS: usize = 50;
const STDERR_TAIL_LINES: usize = 20;

/// Outcome of one successful backup.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub archive: Archive,
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
    /// Result of the retention sweep that followed the dump, if it ran cleanly.
    pub retention: Option<RetentionSummary>,
}

/// Current UTC time as ISO-8601 with `:` and `.` replaced by `-`,
/// e.g. `2024-03-01T02-00-00-123Z`. Sorts lexicographically.
pub fn iso_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

pub fn archive_name(database: &str, now: DateTime<Utc>) -> String {
    format!("{}{}-{}", ARCHIVE_PREFIX, database, iso_timestamp(now))
}

/// Last `n` non-empty lines of a tool's diagnostic stream.
pub(crate) fn stderr_tail(stderr: &str, n: usize) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Relays a tool's diagnostic stream to the log. Only the exit code decides
/// success; a stream without the completion phrase merely earns a warning.
pub(crate) fn log_diagnostics(tool: &str, output: &ToolOutput, completed: &Regex) {
    for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
        debug!("[{}] {}", tool, line);
    }
    if output.is_success() && !completed.is_match(&output.stderr) {
        warn!(
            "{} exited successfully but did not report completion; check its output above",
            tool
        );
    }
}

/// Runs the external dump tool into a fresh, uniquely named archive directory.
#[derive(Clone)]
pub struct DumpEngine {
    store: ArchiveStore,
    runner: Arc<dyn ToolRunner>,
}

impl DumpEngine {
    pub fn new(store: ArchiveStore, runner: Arc<dyn ToolRunner>) -> Self {
        DumpEngine { store, runner }
    }

    /// Claims `<name>.partial` for a name nobody else holds.
    ///
    /// `create_dir` is the atomic claim; on a clash wait for the next
    /// millisecond so the timestamp in the name moves on.
    async fn claim_name(&self, database: &str) -> Result<(String, PathBuf)> {
        for _ in 0..NAME_CLAIM_ATTEMPTS {
            let name = archive_name(database, Utc::now());
            let partial = self.store.partial_path(&name);
            if self.store.archive_path(&name).exists() {
                tokio::time::sleep(Duration::from_millis(1)).await;
                continue;
            }
            match fs::create_dir(&partial) {
                Ok(()) => return Ok((name, partial)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                Err(e) => return Err(BackupError::filesystem(&partial, e)),
            }
        }
        Err(BackupError::filesystem(
            self.store.root(),
            std::io::Error::new(ErrorKind::AlreadyExists, "could not find a free archive name"),
        ))
    }

    pub async fn create_archive(&self, config: &RetentionConfig) -> Result<BackupReport> {
        let started = Instant::now();
        self.store.ensure_root()?;

        let database = config.database_name();
        let (name, partial) = self.claim_name(&database).await?;
        let final_path = self.store.archive_path(&name);
        info!("Dumping database '{}' into {}", database, final_path.display());

        let invocation = ToolInvocation::new(&config.dump_tool)
            .arg(format!("--uri={}", config.connection_uri))
            .arg(format!("--out={}", partial.display()))
            .arg("--gzip");

        let output = match self.runner.run(&invocation, config.tool_timeout).await {
            Ok(output) => output,
            Err(e @ BackupError::ToolNotFound { .. }) => {
                // Nothing was written; the empty claim is useless.
                if let Err(cleanup) = self.store.remove_tree(&partial) {
                    warn!("Could not remove empty {}: {}", partial.display(), cleanup);
                }
                return Err(e);
            }
            Err(e) => {
                warn!("Dump aborted; partial output kept at {}", partial.display());
                return Err(e);
            }
        };

        log_diagnostics(&config.dump_tool, &output, &DUMP_COMPLETED);
        if !output.is_success() {
            warn!("Dump failed; partial output kept at {}", partial.display());
            return Err(BackupError::DumpFailed {
                exit_code: output.exit_code,
                stderr: stderr_tail(&output.stderr, STDERR_TAIL_LINES),
            });
        }

        let stats = self.store.directory_stats(&partial)?;
        self.store.promote(&partial, &final_path)?;

        let completed_at = Utc::now();
        let created_at = fs::metadata(&final_path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or(completed_at);
        let duration = started.elapsed();
        info!(
            "Backup {} complete: {} bytes in {} files ({:.1}s)",
            name,
            stats.size_bytes,
            stats.file_count,
            duration.as_secs_f64()
        );

        Ok(BackupReport {
            archive: Archive {
                name,
                path: final_path,
                size_bytes: stats.size_bytes,
                file_count: stats.file_count,
                created_at,
                age_days: 0,
            },
            duration,
            completed_at,
            retention: None,
        })
    }
}
