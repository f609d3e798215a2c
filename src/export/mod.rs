use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet};
use serde::Serialize;
use sqlx::{sqlite::SqliteRow, Column, Row, SqlitePool, TypeInfo, ValueRef};
use tracing::{info, warn};
use ts_rs::TS;

use crate::db::quote_ident;
use crate::error::{AppError, AppResult};
use crate::schema::MUTABLE_TABLES;

pub const MIME_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const PARTIAL_SUFFIX: &str = ".partial";
const HEADER_FILL: u32 = 0xD9D9D9;

/// `4loki_backup_<YYYY-MM-DD>.xlsx`
pub fn backup_filename(date: NaiveDate) -> String {
    format!("4loki_backup_{}.xlsx", date.format("%Y-%m-%d"))
}

#[derive(Debug, Clone, PartialEq)]
enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

#[derive(Debug, Clone)]
struct TableDump {
    table: &'static str,
    headers: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone)]
pub struct ExportedWorkbook {
    pub bytes: Vec<u8>,
    pub tables: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ExportSummary {
    pub path: String,
    pub file_name: String,
    #[ts(type = "number")]
    pub bytes: u64,
    #[ts(type = "Record<string, number>")]
    pub tables: BTreeMap<String, u64>,
}

/// Reads every mutable table and renders one sheet per table.
///
/// Any failing query aborts the export; no partial workbook is produced.
pub async fn export_workbook(pool: &SqlitePool) -> AppResult<ExportedWorkbook> {
    let mut dumps = Vec::with_capacity(MUTABLE_TABLES.len());
    for table in MUTABLE_TABLES {
        let dump = dump_table(pool, table).await.map_err(|err| {
            AppError::new("EXPORT/QUERY", format!("Could not read table {table}"))
                .with_context("table", *table)
                .with_cause(err)
        })?;
        info!(target: "fourloki", event = "export_table", table, rows = dump.rows.len());
        dumps.push(dump);
    }

    let bytes = render_workbook(&dumps)?;
    let tables = dumps
        .iter()
        .map(|dump| (dump.table.to_string(), dump.rows.len() as u64))
        .collect();
    Ok(ExportedWorkbook { bytes, tables })
}

/// Writes the backup into `dir` via a temporary file and rename.
pub async fn export_to_dir(
    pool: &SqlitePool,
    dir: &Path,
    date: NaiveDate,
) -> AppResult<ExportSummary> {
    let workbook = export_workbook(pool).await?;
    fs::create_dir_all(dir).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "create_out_dir")
            .with_context("path", dir.display().to_string())
    })?;
    let file_name = backup_filename(date);
    let path = dir.join(&file_name);
    let tmp = tmp_path(&path);
    fs::write(&tmp, &workbook.bytes)
        .and_then(|_| fs::rename(&tmp, &path))
        .map_err(|err| {
            let _ = fs::remove_file(&tmp);
            AppError::from(err)
                .with_context("operation", "write_backup")
                .with_context("path", path.display().to_string())
        })?;
    info!(
        target: "fourloki",
        event = "export_written",
        path = %path.display(),
        bytes = workbook.bytes.len()
    );
    Ok(ExportSummary {
        path: path.display().to_string(),
        file_name,
        bytes: workbook.bytes.len() as u64,
        tables: workbook.tables,
    })
}

async fn dump_table(pool: &SqlitePool, table: &'static str) -> Result<TableDump, sqlx::Error> {
    let sql = format!("SELECT * FROM {} ORDER BY \"Id\"", quote_ident(table));
    let rows = sqlx::query(&sql).fetch_all(pool).await?;

    let headers = match rows.first() {
        Some(first) => first
            .columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect(),
        None => table_columns(pool, table).await?,
    };
    let rows = rows.iter().map(row_to_cells).collect();
    Ok(TableDump {
        table,
        headers,
        rows,
    })
}

async fn table_columns(pool: &SqlitePool, table: &str) -> Result<Vec<String>, sqlx::Error> {
    let sql = format!("PRAGMA table_info({})", quote_ident(table));
    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    rows.iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect()
}

fn row_to_cells(row: &SqliteRow) -> Vec<CellValue> {
    row.columns()
        .iter()
        .map(|col| {
            let idx = col.ordinal();
            match row.try_get_raw(idx) {
                Ok(raw) if !raw.is_null() => match raw.type_info().name() {
                    "INTEGER" => row
                        .try_get::<i64, _>(idx)
                        .map(CellValue::Integer)
                        .unwrap_or(CellValue::Null),
                    "REAL" => row
                        .try_get::<f64, _>(idx)
                        .map(CellValue::Real)
                        .unwrap_or(CellValue::Null),
                    "BLOB" => {
                        warn!(
                            target: "fourloki",
                            event = "export_blob_skipped",
                            column = col.name()
                        );
                        CellValue::Null
                    }
                    _ => row
                        .try_get::<String, _>(idx)
                        .map(CellValue::Text)
                        .unwrap_or(CellValue::Null),
                },
                _ => CellValue::Null,
            }
        })
        .collect()
}

fn render_workbook(dumps: &[TableDump]) -> AppResult<Vec<u8>> {
    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(HEADER_FILL));
    let mut workbook = Workbook::new();
    for dump in dumps {
        let sheet = workbook.add_worksheet();
        sheet.set_name(dump.table)?;
        write_sheet(sheet, dump, &header_format)?;
    }
    Ok(workbook.save_to_buffer()?)
}

fn write_sheet(
    sheet: &mut Worksheet,
    dump: &TableDump,
    header_format: &Format,
) -> Result<(), rust_xlsxwriter::XlsxError> {
    for (col, header) in dump.headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, header, header_format)?;
    }
    for (idx, cells) in dump.rows.iter().enumerate() {
        let row = idx as u32 + 1;
        for (col, cell) in cells.iter().enumerate() {
            let col = col as u16;
            match cell {
                CellValue::Null => {}
                CellValue::Integer(i) => {
                    sheet.write_number(row, col, *i as f64)?;
                }
                CellValue::Real(f) => {
                    sheet.write_number(row, col, *f)?;
                }
                CellValue::Text(s) => {
                    sheet.write_string(row, col, s)?;
                }
            }
        }
    }
    Ok(())
}

fn tmp_path(final_path: &Path) -> PathBuf {
    let mut s = OsString::from(final_path.as_os_str());
    s.push(PARTIAL_SUFFIX);
    PathBuf::from(s)
}
