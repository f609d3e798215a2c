use anyhow::{Context, Result as AnyResult};
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;

pub mod clear;

pub use clear::clear_database;

pub async fn open_sqlite_pool(db_path: &Path) -> AnyResult<Pool<Sqlite>> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            tracing::error!(
                target: "fourloki",
                error = %e,
                event = "db_dir_create_failed",
                path = %parent.display()
            );
            e
        })?;
    }
    tracing::info!(target: "fourloki", event = "db_path", path = %db_path.display());

    let opts = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .after_connect(|conn, _| {
            Box::pin(async move {
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                Ok::<_, sqlx::Error>(())
            })
        })
        .connect_with(opts)
        .await
        .with_context(|| format!("open database {}", db_path.display()))?;

    log_effective_pragmas(&pool).await;

    Ok(pool)
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>) {
    use tracing::{info, warn};

    let (sqlite_ver,): (String,) = sqlx::query_as("select sqlite_version()")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let jm: (String,) = sqlx::query_as("PRAGMA journal_mode;")
        .fetch_one(pool)
        .await
        .unwrap_or((String::from("unknown"),));

    let fks: (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .unwrap_or((i64::MIN,));

    info!(
        target: "fourloki",
        event = "db_open",
        sqlite_version = %sqlite_ver,
        journal_mode = %jm.0,
        foreign_keys = %fks.0
    );

    if fks.0 != 1 {
        warn!(
            target: "fourloki",
            event = "db_open_warning",
            msg = "foreign_keys disabled; clear and import ordering is not enforced"
        );
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Run work inside a transaction. Commits on success, rolls back on error.
pub async fn run_in_tx<R, E, F>(pool: &Pool<Sqlite>, f: F) -> Result<R, E>
where
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(&'c mut Transaction<'static, Sqlite>) -> BoxFuture<'c, Result<R, E>>,
{
    use tracing::{error, info, warn};

    let mut tx = pool.begin().await.map_err(E::from)?;
    info!(target: "fourloki", event = "db_tx_begin");
    match f(&mut tx).await {
        Ok(val) => {
            tx.commit().await.map_err(E::from)?;
            info!(target: "fourloki", event = "db_tx_commit");
            Ok(val)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(target: "fourloki", event = "db_tx_rollback_failed", error = %rb);
            } else {
                warn!(target: "fourloki", event = "db_tx_rollback");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn opens_file_database_with_foreign_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("4loki.sqlite3");
        let pool = open_sqlite_pool(&path).await.unwrap();
        let (fks,): (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(fks, 1);
        assert!(path.exists());
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_ident("Dog"), "\"Dog\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
