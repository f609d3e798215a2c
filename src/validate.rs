//! Row Validator: declared field rules plus the structural rules that
//! spreadsheets get wrong most often (missing customer reference, missing
//! appointment times).
//!
//! Validation never mutates the row and is safe to repeat.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::fields::{customer_reference, NormalizedRow, CUSTOMER_REFERENCE};
use crate::normalize::{parse_date_like, serial_to_date};
use crate::schema::{self, FieldSpec, FieldType, TableRules, APPOINTMENT, DOG};

/// Classification attached to every row-level problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum ErrorKind {
    ValidationError,
    MissingReference,
    DatabaseError,
    ProcessingError,
    TransactionError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ValidationError {
    pub field: String,
    pub error: String,
    #[ts(type = "unknown")]
    pub value: Value,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
}

impl ValidationError {
    fn invalid(field: &str, error: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.to_string(),
            error: error.into(),
            value,
            kind: ErrorKind::ValidationError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct RowValidationResult {
    pub table: String,
    #[ts(type = "number")]
    pub row_number: usize,
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

/// Runs every rule that applies to `table` against `row`. Never mutates the row.
pub fn validate_row(table: &str, row: &NormalizedRow, row_number: usize) -> RowValidationResult {
    let errors = match schema::table_rules(table) {
        None => vec![ValidationError::invalid(
            "_table",
            format!("Table {table} is not supported for import"),
            Value::String(table.to_string()),
        )],
        Some(_) => {
            let mut errors = reference_errors(table, row);
            errors.extend(field_errors(table, row));
            errors
        }
    };
    RowValidationResult {
        table: table.to_string(),
        row_number,
        valid: errors.is_empty(),
        errors,
    }
}

/// Mandatory customer reference for dogs and appointments.
pub fn reference_errors(table: &str, row: &NormalizedRow) -> Vec<ValidationError> {
    if table != DOG && table != APPOINTMENT {
        return Vec::new();
    }
    if customer_reference(row).is_some() {
        return Vec::new();
    }
    let error = if table == DOG {
        format!(
            "Dog \"{}\" has no customer reference ({CUSTOMER_REFERENCE})",
            dog_name(row).unwrap_or("unknown")
        )
    } else {
        format!("Appointment has no customer reference ({CUSTOMER_REFERENCE})")
    };
    vec![ValidationError {
        field: CUSTOMER_REFERENCE.to_string(),
        error,
        value: Value::Null,
        kind: ErrorKind::MissingReference,
    }]
}

/// Declared field rules plus the appointment time rule.
pub fn field_errors(table: &str, row: &NormalizedRow) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if let Some(TableRules::Declared(schema)) = schema::table_rules(table) {
        for spec in schema.fields {
            if let Some(error) = check_field(spec, lookup(row, spec.name)) {
                errors.push(error);
            }
        }
    }
    if table == APPOINTMENT {
        for (field, label) in [("TimeStart", "Start time"), ("TimeEnd", "End time")] {
            let present = [field.to_string(), field.to_lowercase()]
                .iter()
                .any(|key| row.get(key).map_or(false, |v| !is_blank(v)));
            if !present {
                errors.push(ValidationError::invalid(
                    field,
                    format!("{label} is required"),
                    Value::Null,
                ));
            }
        }
    }
    errors
}

fn check_field(spec: &FieldSpec, value: Option<&Value>) -> Option<ValidationError> {
    let value = match value {
        Some(v) if !is_blank(v) => v,
        _ => {
            return spec.required.then(|| {
                ValidationError::invalid(
                    spec.name,
                    format!("{} is required", spec.name),
                    value.cloned().unwrap_or(Value::Null),
                )
            });
        }
    };

    match spec.field_type {
        FieldType::String => {
            let max = spec.max_length?;
            let length = match value {
                Value::String(s) => s.chars().count(),
                other => other.to_string().chars().count(),
            };
            (length > max).then(|| {
                ValidationError::invalid(
                    spec.name,
                    format!("{} exceeds maximum length of {max} characters", spec.name),
                    value.clone(),
                )
            })
        }
        FieldType::Number => {
            let numeric = match value {
                Value::Number(_) => true,
                Value::String(s) => s.trim().parse::<f64>().map_or(false, f64::is_finite),
                _ => false,
            };
            (!numeric).then(|| {
                ValidationError::invalid(
                    spec.name,
                    format!("{} must be a number", spec.name),
                    value.clone(),
                )
            })
        }
        FieldType::Date => {
            let parses = match value {
                Value::String(s) => parse_date_like(s).is_some(),
                Value::Number(n) => n.as_f64().and_then(serial_to_date).is_some(),
                _ => false,
            };
            (!parses).then(|| {
                ValidationError::invalid(
                    spec.name,
                    format!("{} must be a valid date", spec.name),
                    value.clone(),
                )
            })
        }
        FieldType::Boolean => (!value.is_boolean()).then(|| {
            ValidationError::invalid(
                spec.name,
                format!("{} must be true or false", spec.name),
                value.clone(),
            )
        }),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Case-insensitive field lookup; spreadsheet headers vary in casing.
fn lookup<'a>(row: &'a NormalizedRow, field: &str) -> Option<&'a Value> {
    row.get(field).or_else(|| {
        row.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(field))
            .map(|(_, value)| value)
    })
}

fn dog_name(row: &NormalizedRow) -> Option<&str> {
    ["Name", "naam"]
        .iter()
        .filter_map(|field| lookup(row, field))
        .find_map(|value| value.as_str().filter(|s| !s.trim().is_empty()))
}
