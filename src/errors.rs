use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Required tool '{tool}' was not found in PATH")]
    ToolNotFound { tool: String },

    #[error("Dump failed ({}): {stderr}", exit_label(.exit_code))]
    DumpFailed { exit_code: Option<i32>, stderr: String },

    #[error("Restore failed ({}): {stderr}", exit_label(.exit_code))]
    RestoreFailed { exit_code: Option<i32>, stderr: String },

    #[error("Backup archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("Another backup or restore is already running for database '{database}' (lock: {})", .lock_path.display())]
    OperationInProgress { database: String, lock_path: PathBuf },

    #[error("'{tool}' did not finish within {}s and was terminated", .timeout.as_secs())]
    TimedOut { tool: String, timeout: Duration },

    #[error("Operation cancelled by user")]
    UserCancelled,
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl BackupError {
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Operator-facing suggestion printed next to the error message.
    pub fn hint(&self) -> &'static str {
        match self {
            BackupError::Configuration(_) => {
                "Check MONGODB_URI, BACKUP_DIR and BACKUP_RETENTION_DAYS in the environment, .env or config.json."
            }
            BackupError::Filesystem { .. } => {
                "Is the backup directory present and writable by this user?"
            }
            BackupError::ToolNotFound { .. } => {
                "Is the database tools package installed and on PATH? Override with BACKUP_DUMP_TOOL / BACKUP_RESTORE_TOOL."
            }
            BackupError::DumpFailed { .. } | BackupError::RestoreFailed { .. } => {
                "Is the database reachable with the configured connection URI and credentials?"
            }
            BackupError::ArchiveNotFound(_) => {
                "Run `dbbackup list` to see the available archive names."
            }
            BackupError::OperationInProgress { .. } => {
                "Wait for the running operation to finish before starting another one."
            }
            BackupError::TimedOut { .. } => {
                "Raise BACKUP_TIMEOUT_SECS, or inspect the leftover .partial directory."
            }
            BackupError::UserCancelled => "Nothing was changed.",
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_failed_message_includes_exit_code() {
        let err = BackupError::DumpFailed {
            exit_code: Some(2),
            stderr: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code 2"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_signal_termination_label() {
        let err = BackupError::RestoreFailed {
            exit_code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_tool_not_found_hint_mentions_path() {
        let err = BackupError::ToolNotFound {
            tool: "mongodump".into(),
        };
        assert!(err.to_string().contains("mongodump"));
        assert!(err.hint().contains("PATH"));
    }
}
