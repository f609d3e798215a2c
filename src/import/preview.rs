//! Reads an uploaded workbook into normalized rows plus validation diagnostics.
//!
//! Nothing here touches the database. Rows with diagnostics are still part of
//! the preview so a person can review them before deciding to import.

use std::collections::BTreeMap;
use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::error::AppResult;
use crate::fields::{
    canonicalize_row, customer_reference, is_customer_reference_header,
    promote_customer_reference, NormalizedRow, CUSTOMER_REFERENCE,
};
use crate::normalize::{
    excel_serial_to_datetime, is_time_field, normalize, number_value, RawCell, ESCAPE_NULL,
};
use crate::schema::resolve_table;
use crate::validate::{validate_row, RowValidationResult};

use super::staging::{StagedPreview, StagedRow, StagedTables};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PreviewResult {
    #[ts(type = "Record<string, Array<Record<string, unknown>>>")]
    pub preview: BTreeMap<String, Vec<NormalizedRow>>,
    pub validation_results: Vec<RowValidationResult>,
    #[serde(skip)]
    #[ts(skip)]
    row_numbers: BTreeMap<String, Vec<usize>>,
}

impl PreviewResult {
    pub fn row_count(&self) -> usize {
        self.preview.values().map(Vec::len).sum()
    }

    fn push(&mut self, table: &str, row_number: usize, row: NormalizedRow) {
        self.preview.entry(table.to_string()).or_default().push(row);
        self.row_numbers
            .entry(table.to_string())
            .or_default()
            .push(row_number);
    }

    /// Rows for staging, tagged with their spreadsheet row numbers.
    pub fn to_staged(&self) -> StagedPreview {
        let tables: StagedTables = self
            .preview
            .iter()
            .map(|(table, rows)| {
                let numbers = self.row_numbers.get(table);
                let staged = rows
                    .iter()
                    .enumerate()
                    .map(|(idx, values)| StagedRow {
                        row_number: numbers
                            .and_then(|n| n.get(idx).copied())
                            .unwrap_or(idx + 2),
                        values: values.clone(),
                    })
                    .collect();
                (table.clone(), staged)
            })
            .collect();
        StagedPreview::new(tables)
    }
}

/// Parses `bytes` as an xlsx workbook and previews every recognised sheet.
pub fn preview_workbook(bytes: &[u8]) -> AppResult<PreviewResult> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))?;
    let mut result = PreviewResult::default();

    for sheet_name in workbook.sheet_names() {
        let Some(table) = resolve_table(&sheet_name) else {
            debug!(
                target: "fourloki",
                event = "preview_sheet_skipped",
                sheet = %sheet_name,
                reason = "unknown_table"
            );
            continue;
        };
        let range = workbook.worksheet_range(&sheet_name)?;
        let (start_row, _) = range.start().unwrap_or((0, 0));
        let mut rows = range.rows();

        let headers: Vec<String> = match rows.next() {
            Some(cells) => cells.iter().map(header_text).collect(),
            None => Vec::new(),
        };
        if headers.iter().all(String::is_empty) {
            debug!(
                target: "fourloki",
                event = "preview_sheet_skipped",
                sheet = %sheet_name,
                reason = "no_headers"
            );
            continue;
        }
        let reference_column = headers
            .iter()
            .position(|header| is_customer_reference_header(header));

        let mut staged = 0usize;
        for (offset, cells) in rows.enumerate() {
            if cells.iter().all(is_blank_cell) {
                continue;
            }
            let row_number = start_row as usize + offset + 2;
            let reference = reference_column
                .and_then(|idx| cells.get(idx))
                .and_then(reference_value);

            let mut raw = NormalizedRow::new();
            for (idx, header) in headers.iter().enumerate() {
                if header.is_empty() || Some(idx) == reference_column {
                    continue;
                }
                let cell = read_cell(header, cells.get(idx).unwrap_or(&Data::Empty));
                raw.insert(header.clone(), normalize(&cell, Some(header)));
            }
            if let Some(idx) = reference_column {
                raw.insert(headers[idx].clone(), reference.clone().unwrap_or(Value::Null));
            }

            let mut row = canonicalize_row(table, &raw);
            if customer_reference(&row).is_none() {
                if let Some(value) = reference {
                    row.insert(CUSTOMER_REFERENCE.to_string(), value);
                }
            }
            let row = promote_customer_reference(row);

            let validation = validate_row(table, &row, row_number);
            if !validation.valid {
                result.validation_results.push(validation);
            }
            result.push(table, row_number, row);
            staged += 1;
        }

        info!(
            target: "fourloki",
            event = "preview_sheet",
            sheet = %sheet_name,
            table,
            rows = staged
        );
    }

    Ok(result)
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

fn is_blank_cell(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Reads the reference column eagerly so later renames cannot lose it.
fn reference_value(cell: &Data) -> Option<Value> {
    let text = match cell {
        Data::Int(i) => return (*i != 0).then(|| Value::from(*i)),
        Data::Float(f) if f.is_finite() => return (*f != 0.0).then(|| number_value(*f)),
        Data::String(s) => s.trim().to_string(),
        Data::Empty => return None,
        other => other.to_string().trim().to_string(),
    };
    if text.is_empty() || text == "0" || text == ESCAPE_NULL {
        return None;
    }
    match text.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(number_value(n)),
        _ => Some(Value::String(text)),
    }
}

fn read_cell(header: &str, cell: &Data) -> RawCell {
    match cell {
        Data::Empty => RawCell::Empty,
        Data::DateTime(dt) => match excel_serial_to_datetime(dt.as_f64()) {
            Some(value) => RawCell::Date(value),
            None => {
                warn!(
                    target: "fourloki",
                    event = "preview_cell_unreadable",
                    field = header,
                    serial = dt.as_f64()
                );
                RawCell::Empty
            }
        },
        Data::Float(f) if (0.0..1.0).contains(f) && is_time_field(header) => RawCell::Number(*f),
        Data::Float(f) => RawCell::Text(float_text(*f)),
        Data::Int(i) => RawCell::Text(i.to_string()),
        Data::Bool(b) => RawCell::Bool(*b),
        Data::String(s) => RawCell::Text(s.clone()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => RawCell::Text(s.clone()),
        Data::Error(e) => {
            warn!(
                target: "fourloki",
                event = "preview_cell_unreadable",
                field = header,
                error = ?e
            );
            RawCell::Empty
        }
    }
}

fn float_text(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}
