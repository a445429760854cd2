// dbbackup/src/config/mod.rs
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{BackupError, Result};
use crate::utils::database_name_from_uri;

pub const DEFAULT_BACKUP_DIR: &str = "./backups";
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_DUMP_TOOL: &str = "mongodump";
pub const DEFAULT_RESTORE_TOOL: &str = "mongorestore";

pub const ENV_CONNECTION_URI: &str = "MONGODB_URI";
pub const ENV_BACKUP_DIR: &str = "BACKUP_DIR";
pub const ENV_RETENTION_DAYS: &str = "BACKUP_RETENTION_DAYS";
pub const ENV_DUMP_TOOL: &str = "BACKUP_DUMP_TOOL";
pub const ENV_RESTORE_TOOL: &str = "BACKUP_RESTORE_TOOL";
pub const ENV_TIMEOUT_SECS: &str = "BACKUP_TIMEOUT_SECS";

// Mirrors config.json; every key is optional and overridden by the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub connection_uri: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub retention_days: Option<u32>,
    pub dump_tool: Option<String>,
    pub restore_tool: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl RawJsonConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .map_err(|e| BackupError::filesystem(config_path, e))?;
        serde_json::from_str(&config_content).map_err(|e| {
            BackupError::Configuration(format!(
                "Failed to parse JSON from config file at {}: {}",
                config_path.display(),
                e
            ))
        })
    }
}

/// Process-wide settings for the backup subsystem.
///
/// Built once by the caller and handed to [`crate::BackupOrchestrator`];
/// nothing below the CLI reads the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionConfig {
    pub backup_root: PathBuf,
    pub retention_days: u32,
    pub connection_uri: String,
    pub dump_tool: String,
    pub restore_tool: String,
    /// Upper bound for a single dump/restore subprocess. `None` waits forever.
    pub tool_timeout: Option<Duration>,
}

impl RetentionConfig {
    pub fn new(connection_uri: impl Into<String>, backup_root: impl Into<PathBuf>) -> Self {
        RetentionConfig {
            backup_root: backup_root.into(),
            retention_days: DEFAULT_RETENTION_DAYS,
            connection_uri: connection_uri.into(),
            dump_tool: DEFAULT_DUMP_TOOL.to_string(),
            restore_tool: DEFAULT_RESTORE_TOOL.to_string(),
            tool_timeout: None,
        }
    }

    /// Database name embedded in the connection URI, `defaultdb` when absent.
    pub fn database_name(&self) -> String {
        database_name_from_uri(&self.connection_uri)
    }

    /// Reads configuration from the real process environment on top of `raw`.
    pub fn from_env(raw: &RawJsonConfig) -> Result<Self> {
        Self::from_lookup(raw, |key| std::env::var(key).ok())
    }

    /// Resolves configuration from `raw` with overrides supplied by `lookup`.
    ///
    /// Precedence is lookup > JSON > built-in default. Blank values count as unset.
    pub fn from_lookup<F>(raw: &RawJsonConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let connection_uri = get(ENV_CONNECTION_URI)
            .or_else(|| raw.connection_uri.clone().filter(|s| !s.trim().is_empty()))
            .ok_or_else(|| {
                BackupError::Configuration(format!(
                    "{} must be set (environment, .env or config.json connection_uri)",
                    ENV_CONNECTION_URI
                ))
            })?;

        let backup_root = get(ENV_BACKUP_DIR)
            .map(PathBuf::from)
            .or_else(|| raw.backup_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));
        if backup_root.as_os_str().is_empty() {
            return Err(BackupError::Configuration(
                "backup directory cannot be empty".to_string(),
            ));
        }

        let retention_days = match get(ENV_RETENTION_DAYS) {
            Some(value) => parse_number::<u32>(ENV_RETENTION_DAYS, &value)?,
            None => raw.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
        };

        let timeout_secs = match get(ENV_TIMEOUT_SECS) {
            Some(value) => Some(parse_number::<u64>(ENV_TIMEOUT_SECS, &value)?),
            None => raw.timeout_secs,
        };
        // Zero means "no limit", matching an unset value.
        let tool_timeout = timeout_secs.filter(|s| *s > 0).map(Duration::from_secs);

        Ok(RetentionConfig {
            backup_root,
            retention_days,
            connection_uri,
            dump_tool: get(ENV_DUMP_TOOL)
                .or_else(|| raw.dump_tool.clone())
                .unwrap_or_else(|| DEFAULT_DUMP_TOOL.to_string()),
            restore_tool: get(ENV_RESTORE_TOOL)
                .or_else(|| raw.restore_tool.clone())
                .unwrap_or_else(|| DEFAULT_RESTORE_TOOL.to_string()),
            tool_timeout,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        BackupError::Configuration(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}
