//! Guarded restore of the live database from an archive.

pub mod db_restore;
pub mod logic;

pub use db_restore::{RestoreEngine, RestoreResult};
pub use logic::{RestoreOutcome, RestoreState};
