use anyhow::Result;

use fourloki_lib::commands::clear_command;
use fourloki_lib::schema::MUTABLE_TABLES;

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn clear_empties_business_tables_and_keeps_reference_data() -> Result<()> {
    let state = util::test_state().await;
    util::seed(&state.pool).await;

    let response = clear_command(&state).await?;
    assert_eq!(response.deleted["Customer"], 2);
    assert_eq!(response.deleted["InvoiceLine"], 1);
    assert_eq!(response.message, "Database cleared: 9 rows deleted.");

    for table in MUTABLE_TABLES {
        assert_eq!(util::count(&state.pool, table).await, 0, "{table}");
    }
    assert_eq!(util::count(&state.pool, "Service").await, 2);
    assert_eq!(util::count(&state.pool, "DogBreed").await, 2);
    Ok(())
}

#[tokio::test]
async fn lingering_reference_rolls_the_whole_clear_back() -> Result<()> {
    let state = util::test_state().await;
    util::seed(&state.pool).await;
    sqlx::raw_sql(
        "CREATE TABLE Payment (Id INTEGER PRIMARY KEY, InvoiceId INTEGER NOT NULL REFERENCES Invoice(Id));
         INSERT INTO Payment (Id, InvoiceId) VALUES (1, 1);",
    )
    .execute(&state.pool)
    .await?;

    let err = clear_command(&state).await.expect_err("FK must block clear");
    assert_eq!(err.code(), "CLEAR/FAILED");
    assert_eq!(err.context().get("table").map(String::as_str), Some("Invoice"));

    // Tables deleted before Invoice were restored by the rollback.
    assert_eq!(util::count(&state.pool, "InvoiceLine").await, 1);
    assert_eq!(util::count(&state.pool, "AppointmentDog").await, 1);
    assert_eq!(util::count(&state.pool, "Customer").await, 2);
    assert!(!state.maintenance_active());
    Ok(())
}

#[tokio::test]
async fn clear_on_empty_database_succeeds() -> Result<()> {
    let state = util::test_state().await;
    let response = clear_command(&state).await?;
    assert_eq!(response.message, "Database cleared: 0 rows deleted.");
    assert_eq!(response.deleted.len(), MUTABLE_TABLES.len());
    Ok(())
}
