//! Point-in-time dumps of the application database: creation, cataloguing,
//! age-based retention and guarded restores.
//!
//! The filesystem is the catalog. Each archive is one `backup-<db>-<timestamp>`
//! directory under the backup root, produced by the external dump tool.
//! [`BackupOrchestrator`] is the entry point for callers.

#![forbid(unsafe_code)]

pub mod backup;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod restore;
pub mod utils;

pub use config::RetentionConfig;
pub use errors::{BackupError, Result};
pub use orchestrator::BackupOrchestrator;
