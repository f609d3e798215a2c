use anyhow::Result;
use tempfile::tempdir;

use fourloki_lib::commands::{import_command, preview_command};
use fourloki_lib::import::ImportStatus;
use fourloki_lib::validate::ErrorKind;
use fourloki_lib::{BackupConfig, CommitPolicy};

#[path = "util.rs"]
mod util;

use util::Cell::{Blank, Num, Text};

fn customers_with_one_nameless() -> Vec<u8> {
    util::workbook(&[(
        "Customer",
        &["Id", "Naam", "Telefoon"],
        vec![
            vec![Num(1.0), Text("Jansen"), Text("0612345678")],
            vec![Num(2.0), Blank, Text("0201234567")],
            vec![Num(3.0), Text("de Vries"), Blank],
            vec![Num(4.0), Text("Bakker"), Blank],
        ],
    )])
}

#[tokio::test]
async fn failing_row_is_skipped_and_the_rest_committed() -> Result<()> {
    let state = util::test_state().await;
    preview_command(&state, Some("s"), &customers_with_one_nameless())?;

    let response = import_command(&state, "s").await?;
    assert_eq!(response.status, ImportStatus::Partial);
    assert!(response.committed);
    assert_eq!(response.report.summary.total_success, 3);
    assert_eq!(response.report.summary.total_failed, 1);
    assert_eq!(
        response.message,
        "Import partially successful: 3 rows imported, 1 failed."
    );

    let errors = &response.report.errors_by_table["Customer"];
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].row, 3);
    assert_eq!(errors[0].kind, ErrorKind::ValidationError);
    assert_eq!(errors[0].fields, vec!["Naam".to_string()]);
    assert_eq!(errors[0].identifier, "Customer row 3");

    assert_eq!(util::count(&state.pool, "Customer").await, 3);
    let phone: String = sqlx::query_scalar("SELECT Telefoon FROM Customer WHERE Id = 1")
        .fetch_one(&state.pool)
        .await?;
    assert_eq!(phone, "0612345678");
    Ok(())
}

#[tokio::test]
async fn import_without_preview_reports_nothing_staged() -> Result<()> {
    let state = util::test_state().await;
    util::seed(&state.pool).await;

    let err = import_command(&state, "never-previewed")
        .await
        .expect_err("nothing staged");
    assert_eq!(err.code(), "IMPORT/NOTHING_STAGED");
    assert!(err.is_client_error());
    assert_eq!(util::count(&state.pool, "Customer").await, 2);
    Ok(())
}

#[tokio::test]
async fn staged_preview_is_consumed_by_import() -> Result<()> {
    let state = util::test_state().await;
    preview_command(&state, Some("s"), &customers_with_one_nameless())?;

    import_command(&state, "s").await?;
    let err = import_command(&state, "s").await.expect_err("consumed");
    assert_eq!(err.code(), "IMPORT/NOTHING_STAGED");
    assert_eq!(util::count(&state.pool, "Customer").await, 3);
    Ok(())
}

#[tokio::test]
async fn second_preview_replaces_the_first_for_a_session() -> Result<()> {
    let state = util::test_state().await;
    let first = util::workbook(&[("Customer", &["Naam"], vec![vec![Text("Old")]])]);
    let second = util::workbook(&[(
        "Customer",
        &["Naam"],
        vec![vec![Text("New A")], vec![Text("New B")]],
    )]);
    preview_command(&state, Some("s"), &first)?;
    preview_command(&state, Some("s"), &second)?;
    preview_command(&state, Some("other"), &first)?;

    let response = import_command(&state, "s").await?;
    assert_eq!(response.status, ImportStatus::Success);
    assert_eq!(response.message, "All 2 rows were imported successfully.");

    let names: Vec<String> = sqlx::query_scalar("SELECT Naam FROM Customer ORDER BY Id")
        .fetch_all(&state.pool)
        .await?;
    assert_eq!(names, vec!["New A".to_string(), "New B".to_string()]);
    assert_eq!(state.staging.len(), 1);
    Ok(())
}

#[tokio::test]
async fn explicit_ids_advance_the_sequence() -> Result<()> {
    let state = util::test_state().await;
    let bytes = util::workbook(&[(
        "Customer",
        &["Id", "Naam"],
        vec![vec![Num(12.0), Text("Jansen")], vec![Num(40.0), Text("Bakker")]],
    )]);
    preview_command(&state, Some("s"), &bytes)?;
    import_command(&state, "s").await?;

    let next = sqlx::query("INSERT INTO Customer (Naam) VALUES ('Organic')")
        .execute(&state.pool)
        .await?
        .last_insert_rowid();
    assert_eq!(next, 41);
    Ok(())
}

#[tokio::test]
async fn children_are_inserted_after_their_parents() -> Result<()> {
    let state = util::test_state().await;
    // Sheet order is deliberately child-first.
    let bytes = util::workbook(&[
        (
            "Dog",
            &["Id", "CustomerId", "Name"],
            vec![vec![Num(5.0), Num(9.0), Text("Bobby")]],
        ),
        ("Customer", &["Id", "Naam"], vec![vec![Num(9.0), Text("Jansen")]]),
    ]);
    preview_command(&state, Some("s"), &bytes)?;

    let response = import_command(&state, "s").await?;
    assert_eq!(response.status, ImportStatus::Success);
    assert_eq!(util::count(&state.pool, "Dog").await, 1);
    Ok(())
}

#[tokio::test]
async fn dangling_foreign_key_is_a_database_error() -> Result<()> {
    let state = util::test_state().await;
    let bytes = util::workbook(&[
        ("Customer", &["Id", "Naam"], vec![vec![Num(1.0), Text("Jansen")]]),
        (
            "Dog",
            &["Id", "CustomerId", "Name"],
            vec![
                vec![Num(1.0), Num(1.0), Text("Bobby")],
                vec![Num(2.0), Num(99.0), Text("Ghost")],
            ],
        ),
    ]);
    preview_command(&state, Some("s"), &bytes)?;

    let response = import_command(&state, "s").await?;
    assert_eq!(response.status, ImportStatus::Partial);
    let failure = &response.report.errors_by_table["Dog"][0];
    assert_eq!(failure.kind, ErrorKind::DatabaseError);
    assert_eq!(failure.identifier, "Ghost");
    assert!(failure.error.contains("FOREIGN KEY"));
    assert_eq!(util::count(&state.pool, "Dog").await, 1);
    Ok(())
}

#[tokio::test]
async fn appointment_without_customer_is_a_missing_reference() -> Result<()> {
    let state = util::test_state().await;
    util::seed(&state.pool).await;
    let bytes = util::workbook(&[(
        "Appointment",
        &["CustomerId", "Date", "TimeStart", "TimeEnd"],
        vec![
            vec![Num(1.0), Text("2024-04-02"), Text("10:00"), Text("11:00")],
            vec![Blank, Text("2024-04-03"), Text("10:00"), Text("11:00")],
        ],
    )]);
    preview_command(&state, Some("s"), &bytes)?;

    let response = import_command(&state, "s").await?;
    let failure = &response.report.errors_by_table["Appointment"][0];
    assert_eq!(failure.kind, ErrorKind::MissingReference);
    assert_eq!(failure.identifier, "Appointment on 2024-04-03 10:00");

    let start: String =
        sqlx::query_scalar("SELECT TimeStart FROM Appointment WHERE Date = '2024-04-02'")
            .fetch_one(&state.pool)
            .await?;
    assert_eq!(start, "10:00:00");
    Ok(())
}

#[tokio::test]
async fn all_or_nothing_rolls_back_on_any_failure() -> Result<()> {
    let config = BackupConfig {
        commit_policy: CommitPolicy::AllOrNothing,
        ..BackupConfig::default()
    };
    let state = util::state_with(config).await;
    preview_command(&state, Some("s"), &customers_with_one_nameless())?;

    let response = import_command(&state, "s").await?;
    assert_eq!(response.status, ImportStatus::Error);
    assert!(!response.committed);
    assert_eq!(response.report.summary.total_failed, 1);
    assert_eq!(util::count(&state.pool, "Customer").await, 0);
    Ok(())
}

#[tokio::test]
async fn import_report_is_written_when_configured() -> Result<()> {
    let dir = tempdir()?;
    let config = BackupConfig {
        reports_dir: Some(dir.path().join("reports")),
        ..BackupConfig::default()
    };
    let state = util::state_with(config).await;
    preview_command(&state, Some("s"), &customers_with_one_nameless())?;
    import_command(&state, "s").await?;

    let reports: Vec<_> = std::fs::read_dir(dir.path().join("reports"))?
        .collect::<std::io::Result<_>>()?;
    assert_eq!(reports.len(), 1);
    let path = reports[0].path();
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    assert!(name.starts_with("import-") && name.ends_with(".json"));

    let report: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(report["status"], "partial");
    assert_eq!(report["report"]["summary"]["totalFailed"], 1);
    assert!(report["generatedAt"].is_string());
    Ok(())
}

#[tokio::test]
async fn import_is_refused_during_maintenance() -> Result<()> {
    let state = util::test_state().await;
    preview_command(&state, Some("s"), &customers_with_one_nameless())?;

    let guard = state.begin_maintenance()?;
    let err = import_command(&state, "s").await.expect_err("busy");
    assert_eq!(err.code(), "DB/MAINTENANCE_ACTIVE");
    drop(guard);

    // The refused attempt left the staged rows in place.
    let response = import_command(&state, "s").await?;
    assert!(response.committed);
    Ok(())
}

#[tokio::test]
async fn failed_commit_keeps_nothing_and_consumes_the_preview() -> Result<()> {
    let state = util::test_state().await;
    // Deferred FKs are only checked at COMMIT, after every row went in.
    sqlx::raw_sql(
        "DROP TABLE InvoiceLine;
         CREATE TABLE InvoiceLine (
             Id INTEGER PRIMARY KEY AUTOINCREMENT,
             InvoiceId INTEGER NOT NULL REFERENCES Invoice(Id) DEFERRABLE INITIALLY DEFERRED,
             Description TEXT,
             Amount REAL
         );",
    )
    .execute(&state.pool)
    .await?;
    let bytes = util::workbook(&[
        ("Customer", &["Id", "Naam"], vec![vec![Num(1.0), Text("Jansen")]]),
        (
            "InvoiceLine",
            &["Id", "InvoiceId", "Description"],
            vec![vec![Num(1.0), Num(77.0), Text("Wash")]],
        ),
    ]);
    preview_command(&state, Some("s"), &bytes)?;

    let err = import_command(&state, "s").await.expect_err("commit must fail");
    assert_eq!(err.code(), "IMPORT/TRANSACTION");
    assert_eq!(err.context().get("stage").map(String::as_str), Some("commit"));
    assert!(!err.is_client_error());

    assert_eq!(util::count(&state.pool, "Customer").await, 0);
    assert_eq!(util::count(&state.pool, "InvoiceLine").await, 0);
    let again = import_command(&state, "s").await.expect_err("preview consumed");
    assert_eq!(again.code(), "IMPORT/NOTHING_STAGED");
    assert!(!state.maintenance_active());
    Ok(())
}

#[tokio::test]
async fn plain_number_dates_import_as_calendar_dates() -> Result<()> {
    let state = util::test_state().await;
    util::seed(&state.pool).await;
    // 45352 is 2024-03-02 as an Excel serial in a general-format cell.
    let bytes = util::workbook(&[(
        "Appointment",
        &["CustomerId", "Date", "TimeStart", "TimeEnd"],
        vec![vec![Num(1.0), Num(45352.0), Text("10:00"), Text("11:00")]],
    )]);

    let preview = preview_command(&state, Some("s"), &bytes)?;
    assert!(
        preview.result.validation_results.is_empty(),
        "{:?}",
        preview.result.validation_results
    );

    let response = import_command(&state, "s").await?;
    assert_eq!(response.status, ImportStatus::Success, "{:?}", response.report);
    let date: String = sqlx::query_scalar("SELECT Date FROM Appointment WHERE Id = 2")
        .fetch_one(&state.pool)
        .await?;
    assert_eq!(date, "2024-03-02");
    Ok(())
}
