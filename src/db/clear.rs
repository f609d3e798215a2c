use std::collections::BTreeMap;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};
use ts_rs::TS;

use super::{quote_ident, run_in_tx};
use crate::error::{AppError, AppResult};
use crate::schema::clear_order;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ClearResponse {
    pub message: String,
    #[ts(type = "Record<string, number>")]
    pub deleted: BTreeMap<String, u64>,
}

/// Deletes every row of the mutable tables, children first, in one transaction.
///
/// Any failing delete rolls the whole call back.
pub async fn clear_database(pool: &SqlitePool) -> AppResult<ClearResponse> {
    let tables = clear_order();
    let deleted = run_in_tx(pool, |tx| {
        async move {
            let mut deleted = BTreeMap::new();
            for table in tables {
                let sql = format!("DELETE FROM {}", quote_ident(table));
                let result = sqlx::query(&sql).execute(&mut **tx).await.map_err(|err| {
                    warn!(
                        target: "fourloki",
                        event = "clear_table_failed",
                        table,
                        error = %err
                    );
                    AppError::new("CLEAR/FAILED", format!("Could not clear table {table}"))
                        .with_context("table", table)
                        .with_cause(err)
                })?;
                info!(
                    target: "fourloki",
                    event = "clear_table",
                    table,
                    rows = result.rows_affected()
                );
                deleted.insert(table.to_string(), result.rows_affected());
            }
            Ok::<_, AppError>(deleted)
        }
        .boxed()
    })
    .await?;

    let total: u64 = deleted.values().sum();
    Ok(ClearResponse {
        message: format!("Database cleared: {total} rows deleted."),
        deleted,
    })
}
