pub mod execute;
pub mod preview;
pub mod report;
pub mod staging;

pub use execute::{import_staged, ImportContext, ImportError};
pub use preview::{preview_workbook, PreviewResult};
pub use report::{
    row_identifier, write_import_report, DetailedError, ImportOutcome, ImportReport,
    ImportResponse, ImportStatus, ImportSummary, TableOutcome,
};
pub use staging::{StagedPreview, StagedRow, StagedTables, StagingStore};
