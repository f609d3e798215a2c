use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::fields::NormalizedRow;
use crate::normalize::{serial_to_date, DB_DATE_FORMAT};
use crate::schema::{APPOINTMENT, CUSTOMER, DOG};
use crate::validate::ErrorKind;

/// One failed row, labelled with something a person recognises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct DetailedError {
    #[ts(type = "number")]
    pub row: usize,
    pub identifier: String,
    pub fields: Vec<String>,
    pub error: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct TableOutcome {
    #[ts(type = "number")]
    pub success: u64,
    #[ts(type = "number")]
    pub failed: u64,
    pub errors: Vec<DetailedError>,
}

/// Per-table tally built up while the importer walks the staged rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportOutcome {
    pub tables: BTreeMap<String, TableOutcome>,
}

impl ImportOutcome {
    pub fn record_success(&mut self, table: &str) {
        self.tables.entry(table.to_string()).or_default().success += 1;
    }

    pub fn record_failure(&mut self, table: &str, error: DetailedError) {
        let outcome = self.tables.entry(table.to_string()).or_default();
        outcome.failed += 1;
        outcome.errors.push(error);
    }

    pub fn total_success(&self) -> u64 {
        self.tables.values().map(|t| t.success).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.tables.values().map(|t| t.failed).sum()
    }

    pub fn into_report(self) -> ImportReport {
        let summary = ImportSummary {
            total_success: self.total_success(),
            total_failed: self.total_failed(),
        };
        let errors_by_table = self
            .tables
            .iter()
            .filter(|(_, outcome)| !outcome.errors.is_empty())
            .map(|(table, outcome)| (table.clone(), outcome.errors.clone()))
            .collect();
        ImportReport {
            summary,
            errors_by_table,
            tables: self.tables,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ImportSummary {
    #[ts(type = "number")]
    pub total_success: u64,
    #[ts(type = "number")]
    pub total_failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ImportReport {
    pub summary: ImportSummary,
    pub errors_by_table: BTreeMap<String, Vec<DetailedError>>,
    pub tables: BTreeMap<String, TableOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ImportStatus {
    Success,
    Partial,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ImportResponse {
    pub status: ImportStatus,
    pub message: String,
    pub committed: bool,
    pub report: ImportReport,
}

impl ImportResponse {
    /// Status and sentence for a batch that was committed.
    pub fn committed(report: ImportReport) -> Self {
        let ImportSummary {
            total_success,
            total_failed,
        } = report.summary;
        let total = total_success + total_failed;
        let (status, message) = if total_failed == 0 {
            (
                ImportStatus::Success,
                format!("All {total} rows were imported successfully."),
            )
        } else if total_success == 0 {
            (
                ImportStatus::Error,
                format!("Import failed: none of the {total} rows could be imported."),
            )
        } else {
            (
                ImportStatus::Partial,
                format!(
                    "Import partially successful: {total_success} rows imported, {total_failed} failed."
                ),
            )
        };
        Self {
            status,
            message,
            committed: true,
            report,
        }
    }

    /// All-or-nothing batch that was rolled back because some rows failed.
    pub fn rolled_back(report: ImportReport) -> Self {
        let total_failed = report.summary.total_failed;
        let total = report.summary.total_success + total_failed;
        Self {
            status: ImportStatus::Error,
            message: format!(
                "Import rolled back: {total_failed} of {total} rows failed, nothing was imported."
            ),
            committed: false,
            report,
        }
    }
}

/// Label used in diagnostics instead of a raw database id.
pub fn row_identifier(table: &str, row: &NormalizedRow, row_number: usize) -> String {
    let text = |key: &str| -> Option<String> {
        match row.get(key)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        }
    };
    match table {
        CUSTOMER => text("Naam").unwrap_or_else(|| format!("Customer row {row_number}")),
        DOG => text("Name")
            .or_else(|| text("naam"))
            .unwrap_or_else(|| format!("Row {row_number}")),
        APPOINTMENT => match (appointment_date(row).or_else(|| text("Date")), text("TimeStart")) {
            (None, None) => format!("Appointment row {row_number}"),
            (date, time) => format!(
                "Appointment on {} {}",
                date.unwrap_or_else(|| "?".into()),
                time.unwrap_or_else(|| "?".into())
            ),
        },
        other => match text("Id") {
            Some(id) => format!("{other} row {row_number} (Id {id})"),
            None => format!("{other} row {row_number}"),
        },
    }
}

// Plain-number Excel serials read better as the calendar date they encode.
fn appointment_date(row: &NormalizedRow) -> Option<String> {
    let serial = row.get("Date")?.as_f64()?;
    serial_to_date(serial).map(|date| date.format(DB_DATE_FORMAT).to_string())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportReportFile<'a> {
    generated_at: String,
    #[serde(flatten)]
    response: &'a ImportResponse,
}

pub fn write_import_report(reports_dir: &Path, response: &ImportResponse) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let now = Utc::now();
    let path = reports_dir.join(now.format("import-%Y%m%d-%H%M%S.json").to_string());
    let payload = ImportReportFile {
        generated_at: now.to_rfc3339(),
        response,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize import report")?;
    fs::write(&path, json).with_context(|| format!("write import report {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn failure(row: usize) -> DetailedError {
        DetailedError {
            row,
            identifier: format!("Row {row}"),
            fields: vec!["Name".into()],
            error: "Name is required".into(),
            kind: ErrorKind::ValidationError,
        }
    }

    #[test]
    fn status_follows_the_counts() {
        let mut outcome = ImportOutcome::default();
        outcome.record_success(CUSTOMER);
        outcome.record_success(DOG);
        let response = ImportResponse::committed(outcome.clone().into_report());
        assert_eq!(response.status, ImportStatus::Success);

        outcome.record_failure(DOG, failure(3));
        let response = ImportResponse::committed(outcome.into_report());
        assert_eq!(response.status, ImportStatus::Partial);
        assert_eq!(response.report.summary.total_failed, 1);
        assert_eq!(response.report.errors_by_table[DOG].len(), 1);
        assert!(!response.report.errors_by_table.contains_key(CUSTOMER));

        let mut failed = ImportOutcome::default();
        failed.record_failure(DOG, failure(2));
        let response = ImportResponse::committed(failed.into_report());
        assert_eq!(response.status, ImportStatus::Error);
    }

    #[test]
    fn identifiers_use_business_fields() {
        let row = |v: Value| v.as_object().cloned().unwrap();
        assert_eq!(
            row_identifier(CUSTOMER, &row(json!({"Naam": "Jansen"})), 2),
            "Jansen"
        );
        assert_eq!(row_identifier(DOG, &row(json!({"Name": null})), 5), "Row 5");
        assert_eq!(
            row_identifier(
                APPOINTMENT,
                &row(json!({"Date": "2024-03-01", "TimeStart": "09:30:00"})),
                2
            ),
            "Appointment on 2024-03-01 09:30:00"
        );
        assert_eq!(
            row_identifier(
                APPOINTMENT,
                &row(json!({"Date": 45352, "TimeStart": "10:00"})),
                2
            ),
            "Appointment on 2024-03-02 10:00"
        );
        assert_eq!(
            row_identifier("InvoiceLine", &row(json!({"Id": 9})), 4),
            "InvoiceLine row 4 (Id 9)"
        );
    }

    #[test]
    fn serialized_error_uses_type_tag() {
        let value = serde_json::to_value(failure(2)).unwrap();
        assert_eq!(value["type"], json!("validation_error"));
    }

    #[test]
    fn report_file_carries_response_fields() {
        let dir = tempdir().unwrap();
        let mut outcome = ImportOutcome::default();
        outcome.record_success(CUSTOMER);
        let response = ImportResponse::committed(outcome.into_report());
        let path = write_import_report(dir.path(), &response).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("import-") && name.ends_with(".json"));
        let body: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(body["status"], json!("success"));
        assert_eq!(body["committed"], json!(true));
        assert!(body["generatedAt"].is_string());
        assert_eq!(body["report"]["summary"]["totalSuccess"], json!(1));
    }
}
