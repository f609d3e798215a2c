use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use calamine::XlsxError;
use rust_xlsxwriter::XlsxError as XlsxWriteError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use std::io::Error as IoError;
use ts_rs::TS;

/// A structured error returned by the backup operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AppError {
    /// Machine readable error code.
    pub code: String,
    /// Human friendly message that can be shown directly to the user.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[ts(type = "Record<string, string>")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

/// Codes the transport layer reports as caller mistakes rather than server faults.
const CLIENT_ERROR_CODES: &[&str] = &["IMPORT/NOTHING_STAGED", "PREVIEW/INVALID_WORKBOOK"];

impl AppError {
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// True when the failure was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        CLIENT_ERROR_CODES.contains(&self.code.as_str())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else {
            "JSON/ERROR"
        };
        AppError::new(code, error.to_string())
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            SqlxError::ColumnNotFound(name) => {
                AppError::new("SQLX/COLUMN_NOT_FOUND", format!("Column not found: {name}"))
            }
            SqlxError::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out acquiring a database connection",
            ),
            SqlxError::PoolClosed => AppError::new("SQLX/POOL_CLOSED", "Database pool is closed"),
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlx"),
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map(|code| format!("Sqlite/{code}"))
                    .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                let mut app_error = AppError::new(code, db.message().to_string());
                if let Some(constraint) = db.constraint() {
                    app_error = app_error.with_context("constraint", constraint.to_string());
                }
                app_error
            }
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}

impl From<XlsxError> for AppError {
    fn from(error: XlsxError) -> Self {
        AppError::new("PREVIEW/INVALID_WORKBOOK", error.to_string())
    }
}

impl From<XlsxWriteError> for AppError {
    fn from(error: XlsxWriteError) -> Self {
        AppError::new("EXPORT/WORKBOOK", error.to_string())
    }
}
