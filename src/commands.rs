//! Request-level operations. Each returns a JSON-serializable response or an
//! [`AppError`] the transport maps onto a status code.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tracing::{info, warn};
use ts_rs::TS;
use uuid::Uuid;

use crate::db::clear::{clear_database, ClearResponse};
use crate::export::{self, ExportSummary, MIME_TYPE};
use crate::import::{
    import_staged, preview_workbook, write_import_report, ImportContext, ImportError,
    ImportResponse, PreviewResult,
};
use crate::state::AppState;
use crate::{AppError, AppResult};

/// In-memory backup ready to be sent as a download.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ExportFile {
    pub file_name: String,
    pub mime_type: String,
    #[ts(type = "Record<string, number>")]
    pub tables: BTreeMap<String, u64>,
    #[serde(skip)]
    #[ts(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PreviewResponse {
    pub preview_token: String,
    #[serde(flatten)]
    pub result: PreviewResult,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub async fn export_command(state: &AppState) -> AppResult<ExportFile> {
    let workbook = export::export_workbook(&state.pool)
        .await
        .map_err(|err| err.with_context("operation", "export"))?;
    Ok(ExportFile {
        file_name: export::backup_filename(today()),
        mime_type: MIME_TYPE.to_string(),
        tables: workbook.tables,
        bytes: workbook.bytes,
    })
}

pub async fn export_to_dir_command(state: &AppState, dir: &Path) -> AppResult<ExportSummary> {
    export::export_to_dir(&state.pool, dir, today())
        .await
        .map_err(|err| err.with_context("operation", "export"))
}

/// Previews `bytes` and stages the rows under `session`, or a fresh token.
pub fn preview_command(
    state: &AppState,
    session: Option<&str>,
    bytes: &[u8],
) -> AppResult<PreviewResponse> {
    let token = session
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let result = preview_workbook(bytes).map_err(|err| {
        err.with_context("operation", "preview")
            .with_context("session", token.clone())
    })?;
    state.staging.stage(&token, result.to_staged());
    info!(
        target: "fourloki",
        event = "preview_staged",
        session = %token,
        rows = result.row_count(),
        diagnostics = result.validation_results.len()
    );
    Ok(PreviewResponse {
        preview_token: token,
        result,
    })
}

/// Imports whatever is staged under `session`. The staged preview is consumed either way.
pub async fn import_command(state: &AppState, session: &str) -> AppResult<ImportResponse> {
    let _guard = state.begin_maintenance()?;
    let staged = state
        .staging
        .take(session)
        .ok_or(ImportError::NothingStaged)
        .map_err(|err| AppError::from(err).with_context("session", session))?;

    let ctx = ImportContext::new(&state.pool).with_policy(state.config.commit_policy);
    let response = import_staged(&ctx, staged)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "import"))?;

    if let Some(dir) = state.config.reports_dir.as_deref() {
        match write_import_report(dir, &response) {
            Ok(path) => info!(
                target: "fourloki",
                event = "import_report_written",
                path = %path.display()
            ),
            Err(err) => warn!(
                target: "fourloki",
                event = "import_report_failed",
                error = %err
            ),
        }
    }
    Ok(response)
}

pub async fn clear_command(state: &AppState) -> AppResult<ClearResponse> {
    let _guard = state.begin_maintenance()?;
    clear_database(&state.pool)
        .await
        .map_err(|err| err.with_context("operation", "clear"))
}
