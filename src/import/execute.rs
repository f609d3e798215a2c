use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::report::{row_identifier, DetailedError, ImportOutcome, ImportResponse};
use super::staging::{StagedPreview, StagedRow};
use crate::config::CommitPolicy;
use crate::db::quote_ident;
use crate::error::AppError;
use crate::fields::{canonicalize_row, promote_customer_reference, NormalizedRow};
use crate::normalize::{format_for_storage, is_timestamp_field, StorageFormat};
use crate::schema::{table_order_key, APPOINTMENT, DOG};
use crate::validate::{reference_errors, validate_row, ErrorKind, ValidationError};

#[derive(Debug, Clone, Copy)]
pub struct ImportContext<'a> {
    pub pool: &'a SqlitePool,
    pub policy: CommitPolicy,
}

impl<'a> ImportContext<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self {
            pool,
            policy: CommitPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: CommitPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("no preview is staged for import")]
    NothingStaged,
    #[error("transaction {stage} failed: {source}")]
    Transaction {
        stage: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::NothingStaged => AppError::new(
                "IMPORT/NOTHING_STAGED",
                "Nothing to import. Upload a workbook for preview first.",
            ),
            ImportError::Transaction { stage, source } => AppError::new(
                "IMPORT/TRANSACTION",
                "The import was rolled back because the database transaction failed.",
            )
            .with_context("stage", stage)
            .with_context("type", "transaction_error")
            .with_cause(source),
        }
    }
}

/// Imports every staged row inside a single transaction.
///
/// Row failures are recorded and skipped. Only failures of the transaction
/// itself abort the batch, in which case nothing is kept.
pub async fn import_staged(
    ctx: &ImportContext<'_>,
    staged: StagedPreview,
) -> Result<ImportResponse, ImportError> {
    import_rows_with(ctx, staged, |tx, table, row| import_row(tx, table, row).boxed()).await
}

async fn import_rows_with<F>(
    ctx: &ImportContext<'_>,
    staged: StagedPreview,
    insert: F,
) -> Result<ImportResponse, ImportError>
where
    F: for<'c> Fn(
        &'c mut Transaction<'static, Sqlite>,
        &'c str,
        &'c StagedRow,
    ) -> BoxFuture<'c, Result<RowInserted, DetailedError>>,
{
    if staged.is_empty() {
        return Err(ImportError::NothingStaged);
    }

    let mut tx = ctx
        .pool
        .begin()
        .await
        .map_err(|source| ImportError::Transaction {
            stage: "begin",
            source,
        })?;
    info!(target: "fourloki", event = "db_tx_begin", rows = staged.row_count());

    let mut tables: Vec<(&String, &Vec<StagedRow>)> = staged.tables.iter().collect();
    tables.sort_by(|a, b| table_order_key(a.0).cmp(&table_order_key(b.0)));

    let mut outcome = ImportOutcome::default();
    let mut explicit_ids: BTreeSet<String> = BTreeSet::new();

    for (table, rows) in tables {
        for staged_row in rows {
            let attempt = AssertUnwindSafe(insert(&mut tx, table, staged_row))
                .catch_unwind()
                .await;
            let result = attempt.unwrap_or_else(|panic| {
                Err(processing_error(table, staged_row, panic_message(panic.as_ref())))
            });
            match result {
                Ok(inserted) => {
                    if inserted.explicit_id {
                        explicit_ids.insert(table.clone());
                    }
                    outcome.record_success(table);
                }
                Err(failure) => {
                    warn!(
                        target: "fourloki",
                        event = "import_row_failed",
                        table = %table,
                        row = failure.row,
                        kind = ?failure.kind,
                        error = %failure.error
                    );
                    outcome.record_failure(table, failure);
                }
            }
        }
    }

    let failed = outcome.total_failed();
    let report = outcome.into_report();

    if ctx.policy == CommitPolicy::AllOrNothing && failed > 0 {
        tx.rollback()
            .await
            .map_err(|source| ImportError::Transaction {
                stage: "rollback",
                source,
            })?;
        warn!(target: "fourloki", event = "db_tx_rollback", failed, policy = "all_or_nothing");
        return Ok(ImportResponse::rolled_back(report));
    }

    if let Err(source) = advance_sequences(&mut tx, &explicit_ids).await {
        if let Err(rb) = tx.rollback().await {
            error!(target: "fourloki", event = "db_tx_rollback_failed", error = %rb);
        }
        return Err(ImportError::Transaction {
            stage: "sequence",
            source,
        });
    }

    tx.commit()
        .await
        .map_err(|source| ImportError::Transaction {
            stage: "commit",
            source,
        })?;
    info!(
        target: "fourloki",
        event = "db_tx_commit",
        success = report.summary.total_success,
        failed = report.summary.total_failed
    );
    Ok(ImportResponse::committed(report))
}

struct RowInserted {
    explicit_id: bool,
}

async fn import_row(
    tx: &mut Transaction<'static, Sqlite>,
    table: &str,
    staged: &StagedRow,
) -> Result<RowInserted, DetailedError> {
    let row = promote_customer_reference(canonicalize_row(table, &staged.values));
    let identifier = row_identifier(table, &row, staged.row_number);

    let missing = reference_errors(table, &row);
    if !missing.is_empty() {
        return Err(detailed(
            staged.row_number,
            identifier,
            &missing,
            ErrorKind::MissingReference,
        ));
    }

    let validation = validate_row(table, &row, staged.row_number);
    if !validation.valid {
        return Err(detailed(
            staged.row_number,
            identifier,
            &validation.errors,
            ErrorKind::ValidationError,
        ));
    }

    let row = format_row(table, row);
    let explicit_id = row.get("Id").map_or(false, |id| !id.is_null());
    let insert = RowInsert::prepare(table, &row);

    match insert.execute(tx).await {
        Ok(()) => Ok(RowInserted { explicit_id }),
        Err(sqlx::Error::Database(db)) => Err(DetailedError {
            row: staged.row_number,
            identifier,
            fields: db
                .constraint()
                .map(|c| vec![c.to_string()])
                .unwrap_or_default(),
            error: db.message().to_string(),
            kind: ErrorKind::DatabaseError,
        }),
        Err(other) => Err(DetailedError {
            row: staged.row_number,
            identifier,
            fields: Vec::new(),
            error: other.to_string(),
            kind: ErrorKind::ProcessingError,
        }),
    }
}

fn detailed(
    row: usize,
    identifier: String,
    errors: &[ValidationError],
    kind: ErrorKind,
) -> DetailedError {
    DetailedError {
        row,
        identifier,
        fields: errors.iter().map(|e| e.field.clone()).collect(),
        error: errors
            .iter()
            .map(|e| e.error.as_str())
            .collect::<Vec<_>>()
            .join("; "),
        kind,
    }
}

fn processing_error(table: &str, staged: &StagedRow, message: String) -> DetailedError {
    DetailedError {
        row: staged.row_number,
        identifier: row_identifier(table, &staged.values, staged.row_number),
        fields: Vec::new(),
        error: format!("Unexpected error while importing row: {message}"),
        kind: ErrorKind::ProcessingError,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

fn storage_format(table: &str, field: &str) -> Option<StorageFormat> {
    match (table, field) {
        (APPOINTMENT, "Date" | "DateEnd") => Some(StorageFormat::Date),
        (APPOINTMENT, "TimeStart" | "TimeEnd") => Some(StorageFormat::Time),
        (DOG, "Birthday") => Some(StorageFormat::Date),
        (_, field) if is_timestamp_field(field) => Some(StorageFormat::Timestamp),
        _ => None,
    }
}

/// Date and time columns rewritten into the database's text formats.
fn format_row(table: &str, row: NormalizedRow) -> NormalizedRow {
    row.into_iter()
        .map(|(field, value)| match storage_format(table, &field) {
            Some(format) => {
                let formatted = format_for_storage(format, &field, &value);
                (field, formatted)
            }
            None => (field, value),
        })
        .collect()
}

/// A single-row insert over the row's non-null columns, so database
/// defaults still apply to the rest.
#[derive(Debug)]
struct RowInsert {
    sql: String,
    payload: Option<String>,
}

impl RowInsert {
    fn prepare(table: &str, row: &NormalizedRow) -> Self {
        let present: NormalizedRow = row
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let table_ident = quote_ident(table);
        if present.is_empty() {
            return Self {
                sql: format!("INSERT INTO {table_ident} DEFAULT VALUES"),
                payload: None,
            };
        }
        let columns: Vec<String> = present.keys().map(|key| quote_ident(key)).collect();
        let values: Vec<String> = present
            .keys()
            .map(|key| json_extract_for_column(key))
            .collect();
        Self {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table_ident,
                columns.join(", "),
                values.join(", ")
            ),
            payload: Some(Value::Object(present).to_string()),
        }
    }

    async fn execute(&self, tx: &mut Transaction<'static, Sqlite>) -> Result<(), sqlx::Error> {
        let mut query = sqlx::query(&self.sql);
        if let Some(payload) = &self.payload {
            query = query.bind(payload.as_str());
        }
        query.execute(&mut **tx).await?;
        Ok(())
    }
}

fn json_extract_for_column(column: &str) -> String {
    let escaped = column.replace('\\', "\\\\");
    let escaped = escaped.replace('"', "\\\"");
    let escaped = escaped.replace('\'', "''");
    format!("json_extract(?1, '$.\"{}\"')", escaped)
}

/// Raises `sqlite_sequence` past the highest restored id of each table.
async fn advance_sequences(
    tx: &mut Transaction<'static, Sqlite>,
    tables: &BTreeSet<String>,
) -> Result<(), sqlx::Error> {
    for table in tables {
        let autoincrement: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 \
             AND upper(sql) LIKE '%AUTOINCREMENT%'",
        )
        .bind(table)
        .fetch_optional(&mut **tx)
        .await?;
        if autoincrement.is_none() {
            debug!(target: "fourloki", event = "sequence_skipped", table = %table);
            continue;
        }

        let max_sql = format!("SELECT MAX(\"Id\") FROM {}", quote_ident(table));
        let max_id: Option<i64> = sqlx::query_scalar(&max_sql).fetch_one(&mut **tx).await?;
        let Some(max_id) = max_id else {
            continue;
        };

        let updated = sqlx::query("UPDATE sqlite_sequence SET seq = MAX(seq, ?1) WHERE name = ?2")
            .bind(max_id)
            .bind(table)
            .execute(&mut **tx)
            .await?;
        if updated.rows_affected() == 0 {
            sqlx::query("INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)")
                .bind(table)
                .bind(max_id)
                .execute(&mut **tx)
                .await?;
        }
        info!(target: "fourloki", event = "sequence_advanced", table = %table, seq = max_id);
    }
    Ok(())
}
