#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::path::Path;

use fourloki_lib::{AppState, BackupConfig};
use rust_xlsxwriter::Workbook;
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, SqlitePool};

pub const SCHEMA: &str = include_str!("fixtures/schema.sql");

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::raw_sql(SCHEMA).execute(&pool).await.expect("apply schema");
    pool
}

/// Creates a database file with the fixture schema and closes it again.
pub async fn file_db(path: &Path) {
    let opts = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("create database file");
    sqlx::raw_sql(SCHEMA).execute(&pool).await.expect("apply schema");
    pool.close().await;
}

pub async fn state_with(config: BackupConfig) -> AppState {
    AppState::new(temp_pool().await, config).expect("app state")
}

pub async fn test_state() -> AppState {
    state_with(BackupConfig::default()).await
}

pub async fn seed(pool: &SqlitePool) {
    sqlx::raw_sql(
        "INSERT INTO Customer (Id, Naam, Telefoon, Postcode, IsAllowContactShare, CreatedOn, UpdatedOn)
             VALUES (1, 'Jansen', '0612345678', '1234AB', 1, '2023-05-01 09:00:00', '2023-05-02 10:00:00'),
                    (2, 'de Vries', NULL, NULL, 0, '2023-06-01 09:00:00', '2023-06-01 09:00:00');
         INSERT INTO Dog (Id, CustomerId, Name, DogBreedId, DogSizeId, Birthday, CreatedOn, UpdatedOn)
             VALUES (1, 1, 'Bobby', 1, 1, '2019-04-12', '2023-05-01 09:00:00', '2023-05-01 09:00:00'),
                    (2, 2, 'Rex', 2, 2, NULL, '2023-06-01 09:00:00', '2023-06-01 09:00:00');
         INSERT INTO Appointment (Id, CustomerId, Date, TimeStart, TimeEnd, AppointmentStatusId, Note, IsPaidInCash, TipAmount, CreatedOn, UpdatedOn)
             VALUES (1, 1, '2024-03-01', '09:30:00', '11:00:00', 2, 'Nervous dog', 1, 2.5, '2024-02-20 08:00:00', '2024-03-01 11:05:00');
         INSERT INTO AppointmentDog (Id, AppointmentId, DogId) VALUES (1, 1, 1);
         INSERT INTO ServiceAppointmentDog (Id, ServiceId, AppointmentDogId) VALUES (1, 1, 1);
         INSERT INTO Invoice (Id, CustomerId, InvoiceNumber, InvoiceDate, Total)
             VALUES (1, 1, 'F-2024-001', '2024-03-01', 27.5);
         INSERT INTO InvoiceLine (Id, InvoiceId, Description, Amount) VALUES (1, 1, 'Wash', 25.0);",
    )
    .execute(pool)
    .await
    .expect("seed business data");
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[derive(Debug, Clone)]
pub enum Cell {
    Text(&'static str),
    Num(f64),
    Blank,
}

/// Builds an xlsx workbook in memory: one sheet per `(name, headers, rows)`.
pub fn workbook(sheets: &[(&str, &[&str], Vec<Vec<Cell>>)]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    for (name, headers, rows) in sheets {
        let sheet = workbook.add_worksheet();
        sheet.set_name(*name).unwrap();
        for (col, header) in headers.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        for (idx, row) in rows.iter().enumerate() {
            for (col, cell) in row.iter().enumerate() {
                let (r, c) = (idx as u32 + 1, col as u16);
                match cell {
                    Cell::Text(s) => {
                        sheet.write_string(r, c, *s).unwrap();
                    }
                    Cell::Num(n) => {
                        sheet.write_number(r, c, *n).unwrap();
                    }
                    Cell::Blank => {}
                }
            }
        }
    }
    workbook.save_to_buffer().unwrap()
}
