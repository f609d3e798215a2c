use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use ts_rs::TS;

pub const DB_ENV: &str = "FOURLOKI_DB";
pub const COMMIT_POLICY_ENV: &str = "FOURLOKI_COMMIT_POLICY";
pub const STAGING_TTL_ENV: &str = "FOURLOKI_STAGING_TTL_SECS";
pub const REPORTS_DIR_ENV: &str = "FOURLOKI_REPORTS_DIR";
pub const LOG_ENV: &str = "FOURLOKI_LOG";

pub const DEFAULT_LOG_FILTER: &str = "fourloki=info,sqlx=warn";
pub const DEFAULT_STAGING_TTL: Duration = Duration::from_secs(3600);

/// What the importer does when some rows fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum CommitPolicy {
    /// Commit the rows that succeeded; failed rows are reported and skipped.
    #[default]
    BestEffort,
    /// Roll back the batch when any row failed.
    AllOrNothing,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown commit policy {0:?} (expected best_effort or all_or_nothing)")]
pub struct UnknownCommitPolicy(String);

impl FromStr for CommitPolicy {
    type Err = UnknownCommitPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "best_effort" => Ok(CommitPolicy::BestEffort),
            "all_or_nothing" => Ok(CommitPolicy::AllOrNothing),
            _ => Err(UnknownCommitPolicy(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupConfig {
    pub db_path: PathBuf,
    pub commit_policy: CommitPolicy,
    pub staging_ttl: Duration,
    pub reports_dir: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            commit_policy: CommitPolicy::default(),
            staging_ttl: DEFAULT_STAGING_TTL,
            reports_dir: None,
        }
    }
}

impl BackupConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; invalid values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = value(DB_ENV) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(raw) = value(COMMIT_POLICY_ENV) {
            match raw.parse() {
                Ok(policy) => config.commit_policy = policy,
                Err(err) => warn!(
                    target: "fourloki",
                    event = "config_invalid",
                    key = COMMIT_POLICY_ENV,
                    error = %err
                ),
            }
        }
        if let Some(raw) = value(STAGING_TTL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.staging_ttl = Duration::from_secs(secs),
                Err(err) => warn!(
                    target: "fourloki",
                    event = "config_invalid",
                    key = STAGING_TTL_ENV,
                    value = %raw,
                    error = %err
                ),
            }
        }
        config.reports_dir = value(REPORTS_DIR_ENV).map(PathBuf::from);
        config
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("4loki")
        .join("4loki.sqlite3")
}
