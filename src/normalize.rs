//! Conversion of raw spreadsheet cells into values the database accepts.
//!
//! Everything here is total: malformed input becomes `null` (with a warning)
//! instead of an error, so a single odd cell never aborts a preview or import.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Literal written by SQL dump tools for a NULL cell.
pub const ESCAPE_NULL: &str = "\\N";

/// Dates before this year are spreadsheet epoch artifacts, not real data.
pub const OLD_DATE_CUTOFF_YEAR: i32 = 1910;

const LEGACY_PLACEHOLDER_DATES: &[&str] = &["1900-01-01", "1899-12-31"];

/// Fields stored as booleans even though spreadsheets carry them as 0/1 or text.
const BOOLEAN_FIELDS: &[&str] = &["ispaidincash", "isallowcontactshare"];

const TIMESTAMP_FIELDS: &[&str] = &["createdon", "updatedon"];

const SECONDS_PER_DAY: f64 = 86_400.0;

pub const DB_DATE_FORMAT: &str = "%Y-%m-%d";
pub const DB_TIME_FORMAT: &str = "%H:%M:%S";
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Canonical decimal spelling only; "0612345678" stays text so phone numbers keep their zero.
static NUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?(0|[1-9]\d*)(\.\d+)?$").expect("numeric regex"));

static CLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2}))?$").expect("clock regex"));

/// A cell as read from the workbook, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDateTime),
}

fn field_key(field: &str) -> String {
    field
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn is_boolean_field(field: &str) -> bool {
    BOOLEAN_FIELDS.contains(&field_key(field).as_str())
}

pub fn is_timestamp_field(field: &str) -> bool {
    TIMESTAMP_FIELDS.contains(&field_key(field).as_str())
}

/// Clock-time columns such as `TimeStart`, `TimeEnd` or a bare `Start`/`End`.
///
/// `DateEnd` is a date, not a time, so `start`/`end` only count on their own.
pub fn is_time_field(field: &str) -> bool {
    let key = field_key(field);
    key.contains("time") || matches!(key.as_str(), "start" | "end" | "begin")
}

pub fn normalize(value: &RawCell, field: Option<&str>) -> Value {
    let boolean = field.map(is_boolean_field).unwrap_or(false);
    match value {
        RawCell::Empty => Value::Null,
        RawCell::Bool(b) => Value::Bool(*b),
        RawCell::Number(n) => normalize_number(*n, boolean, field),
        RawCell::Text(text) => normalize_text(text, boolean),
        RawCell::Date(dt) => {
            if boolean {
                Value::Bool(false)
            } else {
                normalize_datetime(dt, field)
            }
        }
    }
}

fn normalize_number(n: f64, boolean: bool, field: Option<&str>) -> Value {
    if !n.is_finite() {
        warn!(
            target: "fourloki",
            event = "normalize_unparseable",
            field = field.unwrap_or(""),
            value = %n
        );
        return Value::Null;
    }
    if boolean {
        return Value::Bool(n == 1.0);
    }
    if (0.0..1.0).contains(&n) {
        return time_from_fraction(n)
            .map(Value::String)
            .unwrap_or(Value::Null);
    }
    number_value(n)
}

fn normalize_text(text: &str, boolean: bool) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == ESCAPE_NULL || is_legacy_placeholder(trimmed) {
        return Value::Null;
    }
    if boolean {
        let lowered = trimmed.to_ascii_lowercase();
        return Value::Bool(matches!(lowered.as_str(), "1" | "true" | "yes"));
    }
    if trimmed == "00:00" || trimmed == "00:00:00" {
        return Value::Null;
    }
    if NUMERIC_RE.is_match(trimmed) {
        if trimmed == "0" {
            return Value::Null;
        }
        return match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => number_value(n),
            _ => Value::String(text.to_string()),
        };
    }
    if let Some(date) = parse_date_like(trimmed) {
        if date.year() < OLD_DATE_CUTOFF_YEAR {
            return Value::Null;
        }
        return Value::String(trimmed.to_string());
    }
    Value::String(text.to_string())
}

fn normalize_datetime(dt: &NaiveDateTime, field: Option<&str>) -> Value {
    let time_field = field.map(is_time_field).unwrap_or(false);
    if dt.year() < OLD_DATE_CUTOFF_YEAR {
        // Bare times are anchored to the spreadsheet epoch.
        if time_field {
            return clock_value(dt.time());
        }
        return Value::Null;
    }
    if time_field {
        return clock_value(dt.time());
    }
    if field.map(is_timestamp_field).unwrap_or(false) {
        return Value::String(dt.format(DB_TIMESTAMP_FORMAT).to_string());
    }
    Value::String(dt.date().format(DB_DATE_FORMAT).to_string())
}

fn clock_value(time: NaiveTime) -> Value {
    if time.num_seconds_from_midnight() == 0 {
        Value::Null
    } else {
        Value::String(time.format(DB_TIME_FORMAT).to_string())
    }
}

fn is_legacy_placeholder(text: &str) -> bool {
    text.contains(LEGACY_PLACEHOLDER_DATES[0]) || text.starts_with(LEGACY_PLACEHOLDER_DATES[1])
}

pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

/// Converts an Excel fraction-of-a-day into `HH:MM:SS`. Only an exact zero
/// (midnight) counts as "not entered"; tiny fractions round up to one second.
pub fn time_from_fraction(fraction: f64) -> Option<String> {
    if !(0.0..1.0).contains(&fraction) || fraction == 0.0 {
        return None;
    }
    let seconds = ((fraction * SECONDS_PER_DAY).round() as u32).clamp(1, 86_399);
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0)
        .map(|time| time.format(DB_TIME_FORMAT).to_string())
}

/// Converts an Excel serial number (1900 date system) into a timestamp.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.floor();
    let millis = ((serial - days) * SECONDS_PER_DAY * 1000.0).round() as i64;
    epoch
        .checked_add_signed(Duration::try_days(days as i64)?)?
        .checked_add_signed(Duration::try_milliseconds(millis)?)
}

/// Calendar date of an Excel serial that arrived as a plain number cell.
///
/// Serials below one day or before the cutoff year are not real dates.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if serial < 1.0 {
        return None;
    }
    let dt = excel_serial_to_datetime(serial)?;
    (dt.year() >= OLD_DATE_CUTOFF_YEAR).then(|| dt.date())
}

/// Parses the date spellings found in historical spreadsheets.
pub fn parse_date_like(text: &str) -> Option<NaiveDate> {
    parse_datetime_like(text).map(|dt| dt.date())
}

fn parse_datetime_like(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Storage representation applied by the importer right before insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    Date,
    Time,
    Timestamp,
}

pub fn format_for_storage(format: StorageFormat, field: &str, value: &Value) -> Value {
    let formatted = match value {
        Value::Null => return Value::Null,
        Value::String(text) => format_text(format, text),
        Value::Number(n) => n.as_f64().and_then(|n| format_number(format, n)),
        _ => None,
    };
    match formatted {
        Some(text) => Value::String(text),
        None => {
            warn!(
                target: "fourloki",
                event = "format_degraded_to_null",
                field,
                value = %value
            );
            Value::Null
        }
    }
}

fn format_text(format: StorageFormat, text: &str) -> Option<String> {
    let text = text.trim();
    match format {
        StorageFormat::Time => {
            if let Some(caps) = CLOCK_RE.captures(text) {
                let hours: u32 = caps[1].parse().ok()?;
                let minutes: u32 = caps[2].parse().ok()?;
                let seconds: u32 = caps.get(3).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
                let time = NaiveTime::from_hms_opt(hours, minutes, seconds)?;
                return Some(time.format(DB_TIME_FORMAT).to_string());
            }
            parse_datetime_like(text).map(|dt| dt.time().format(DB_TIME_FORMAT).to_string())
        }
        StorageFormat::Date => {
            let date = parse_date_like(text)?;
            (date.year() >= OLD_DATE_CUTOFF_YEAR)
                .then(|| date.format(DB_DATE_FORMAT).to_string())
        }
        StorageFormat::Timestamp => {
            let dt = parse_datetime_like(text)?;
            (dt.year() >= OLD_DATE_CUTOFF_YEAR)
                .then(|| dt.format(DB_TIMESTAMP_FORMAT).to_string())
        }
    }
}

fn format_number(format: StorageFormat, n: f64) -> Option<String> {
    match format {
        StorageFormat::Time => time_from_fraction(n.fract()),
        StorageFormat::Date => {
            let dt = excel_serial_to_datetime(n)?;
            (dt.year() >= OLD_DATE_CUTOFF_YEAR)
                .then(|| dt.format(DB_DATE_FORMAT).to_string())
        }
        StorageFormat::Timestamp => {
            let dt = excel_serial_to_datetime(n)?;
            (dt.year() >= OLD_DATE_CUTOFF_YEAR)
                .then(|| dt.format(DB_TIMESTAMP_FORMAT).to_string())
        }
    }
}
