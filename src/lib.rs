//! Backup, preview and restore engine for the 4loki business database.
//!
//! Exports the mutable tables to an xlsx workbook, previews uploaded
//! workbooks against the declared table schemas, and restores them inside a
//! single transaction with a per-row report.

pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod fields;
pub mod import;
pub mod logging;
pub mod normalize;
pub mod schema;
pub mod state;
pub mod validate;

pub use config::{BackupConfig, CommitPolicy};
pub use error::{AppError, AppResult};
pub use logging::init_logging;
pub use state::AppState;
