// dbbackup/src/restore/logic.rs
//! Interactive restore: select an archive, show what will happen, and only
//! restore after the operator types the confirmation word on the spot.
//!
//! The flow is encoded in types. A [`PendingRestore`] can only be built from a
//! [`SelectedArchive`], and [`PendingRestore::confirm`] is the only way to
//! reach the restore engine, so there is no path around the prompt.

use std::io::{BufRead, Write};
use tracing::info;

use super::db_restore::RestoreResult;
use crate::backup::Archive;
use crate::errors::{BackupError, Result};
use crate::orchestrator::BackupOrchestrator;
use crate::utils::format_bytes;

/// Word the operator must type to proceed. Compared ASCII case-insensitively.
pub const CONFIRMATION_TOKEN: &str = "RESTORE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Idle,
    ArchiveSelected,
    AwaitingConfirmation,
    Restoring,
    Succeeded,
    Failed,
    Cancelled,
}

pub fn is_confirmation(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case(CONFIRMATION_TOKEN)
}

/// An archive that exists in the catalog and is about to be offered for restore.
pub struct SelectedArchive<'a> {
    orchestrator: &'a BackupOrchestrator,
    archive: Archive,
}

/// The operator has been warned; waiting for their answer.
pub struct PendingRestore<'a> {
    orchestrator: &'a BackupOrchestrator,
    archive: Archive,
}

#[derive(Debug)]
pub enum RestoreOutcome {
    Succeeded(RestoreResult),
    Cancelled,
}

impl RestoreOutcome {
    pub fn state(&self) -> RestoreState {
        match self {
            RestoreOutcome::Succeeded(_) => RestoreState::Succeeded,
            RestoreOutcome::Cancelled => RestoreState::Cancelled,
        }
    }

    /// Treats a declined prompt as `UserCancelled`.
    pub fn into_result(self) -> Result<RestoreResult> {
        match self {
            RestoreOutcome::Succeeded(result) => Ok(result),
            RestoreOutcome::Cancelled => Err(BackupError::UserCancelled),
        }
    }
}

/// State the flow ended in. A restore that errored before an archive was
/// selected never left `Idle`.
pub fn final_state(result: &Result<RestoreOutcome>) -> RestoreState {
    match result {
        Ok(outcome) => outcome.state(),
        Err(BackupError::ArchiveNotFound(_)) => RestoreState::Idle,
        Err(BackupError::UserCancelled) => RestoreState::Cancelled,
        Err(_) => RestoreState::Failed,
    }
}

/// `IDLE -> ARCHIVE_SELECTED`. Fails with `ArchiveNotFound` for unknown names.
pub fn select<'a>(orchestrator: &'a BackupOrchestrator, name: &str) -> Result<SelectedArchive<'a>> {
    let archive = orchestrator.find_backup(name)?;
    Ok(SelectedArchive {
        orchestrator,
        archive,
    })
}

impl<'a> SelectedArchive<'a> {
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn state(&self) -> RestoreState {
        RestoreState::ArchiveSelected
    }

    /// `ARCHIVE_SELECTED -> AWAITING_CONFIRMATION`
    pub fn request_confirmation(self) -> PendingRestore<'a> {
        PendingRestore {
            orchestrator: self.orchestrator,
            archive: self.archive,
        }
    }
}

impl PendingRestore<'_> {
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn state(&self) -> RestoreState {
        RestoreState::AwaitingConfirmation
    }

    /// `AWAITING_CONFIRMATION -> RESTORING -> SUCCEEDED | FAILED`, or `CANCELLED`
    /// when `input` is anything but the confirmation word.
    pub async fn confirm(self, input: &str) -> Result<RestoreOutcome> {
        if !is_confirmation(input) {
            info!("Restore of {} cancelled by operator", self.archive.name);
            return Ok(RestoreOutcome::Cancelled);
        }
        info!("Restore of {} confirmed; state {:?}", self.archive.name, RestoreState::Restoring);
        let result = self.orchestrator.restore_backup(&self.archive.name).await?;
        Ok(RestoreOutcome::Succeeded(result))
    }
}

/// Writes the archive summary and the destructive-action warning.
pub fn describe_archive<W: Write>(out: &mut W, archive: &Archive, database: &str) -> std::io::Result<()> {
    writeln!(out, "Archive:  {}", archive.name)?;
    writeln!(out, "Path:     {}", archive.path.display())?;
    writeln!(out, "Created:  {}", archive.created_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(out, "Age:      {} day(s)", archive.age_days)?;
    writeln!(out, "Size:     {} in {} file(s)", format_bytes(archive.size_bytes), archive.file_count)?;
    writeln!(out)?;
    writeln!(out, "⚠️  WARNING: this will DROP every collection in database '{}'", database)?;
    writeln!(out, "    and replace it with the contents of this archive. This cannot be undone.")?;
    Ok(())
}

/// Full interactive flow: select, warn, prompt on `out`, read one fresh line from `input`.
///
/// Returns `Cancelled` for any answer other than the confirmation word,
/// including end of input.
pub async fn run_interactive<R: BufRead, W: Write>(
    orchestrator: &BackupOrchestrator,
    name: &str,
    mut input: R,
    out: &mut W,
) -> Result<RestoreOutcome> {
    let selected = select(orchestrator, name)?;
    let database = orchestrator.config().database_name();
    let io_err = |e: std::io::Error| BackupError::filesystem("<terminal>", e);

    describe_archive(out, selected.archive(), &database).map_err(io_err)?;
    let pending = selected.request_confirmation();

    write!(out, "Type {} to continue: ", CONFIRMATION_TOKEN).map_err(io_err)?;
    out.flush().map_err(io_err)?;

    let mut answer = String::new();
    input.read_line(&mut answer).map_err(io_err)?;
    pending.confirm(&answer).await
}
