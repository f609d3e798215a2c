use sqlx::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::BackupConfig;
use crate::db::open_sqlite_pool;
use crate::fields::validate_field_maps;
use crate::import::StagingStore;
use crate::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub staging: Arc<StagingStore>,
    pub config: Arc<BackupConfig>,
    pub maintenance: Arc<AtomicBool>,
}

impl AppState {
    /// Builds the state around an open pool. Fails when the field alias tables are inconsistent.
    pub fn new(pool: SqlitePool, config: BackupConfig) -> AppResult<Self> {
        validate_field_maps().map_err(|err| {
            AppError::new("APP/FIELD_MAPS", "Field alias tables are inconsistent")
                .with_context("error", err.to_string())
        })?;
        Ok(Self {
            pool,
            staging: Arc::new(StagingStore::new(config.staging_ttl)),
            config: Arc::new(config),
            maintenance: Arc::new(AtomicBool::new(false)),
        })
    }

    pub async fn open(config: BackupConfig) -> AppResult<Self> {
        let pool = open_sqlite_pool(&config.db_path).await?;
        Self::new(pool, config)
    }

    pub fn begin_maintenance(&self) -> AppResult<MaintenanceGuard> {
        MaintenanceGuard::begin(self.maintenance.clone())
    }

    pub fn maintenance_active(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }
}

/// Held while an import or clear runs; a second one is refused until it drops.
pub struct MaintenanceGuard {
    flag: Arc<AtomicBool>,
}

impl MaintenanceGuard {
    fn begin(flag: Arc<AtomicBool>) -> AppResult<Self> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::new(
                "DB/MAINTENANCE_ACTIVE",
                "Another import or clear is already running.",
            ));
        }
        Ok(Self { flag })
    }
}

impl Drop for MaintenanceGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn maintenance_guard_is_exclusive() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_lazy("sqlite::memory:")
            .expect("pool");
        let state = AppState::new(pool, BackupConfig::default()).expect("state");

        let guard = state.begin_maintenance().expect("first guard");
        assert!(state.maintenance_active());
        let err = state.begin_maintenance().err().expect("second guard refused");
        assert_eq!(err.code(), "DB/MAINTENANCE_ACTIVE");
        drop(guard);
        assert!(!state.maintenance_active());
        assert!(state.begin_maintenance().is_ok());
    }
}
