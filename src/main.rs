use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use fourloki_lib::commands::{
    clear_command, export_to_dir_command, import_command, preview_command, PreviewResponse,
};
use fourloki_lib::import::{ImportResponse, ImportStatus};
use fourloki_lib::{AppError, AppState, BackupConfig};

const CLI_SESSION: &str = "cli";
const EXIT_IMPORT_FAILED: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "fourloki", about = "4loki backup and restore", version)]
struct Cli {
    /// SQLite database to operate on (defaults to FOURLOKI_DB or the data directory).
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write every mutable table to 4loki_backup_<date>.xlsx.
    Export {
        /// Directory to write the workbook into.
        #[arg(long, value_name = "DIR", default_value = ".")]
        out: PathBuf,
        /// Emit a machine-readable JSON summary.
        #[arg(long)]
        json: bool,
    },
    /// Show what a workbook would import, with validation diagnostics.
    Preview {
        file: PathBuf,
        /// Emit the full preview as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Preview a workbook and import it in one go.
    Restore {
        file: PathBuf,
        /// Import even when the preview reported diagnostics.
        #[arg(long)]
        yes: bool,
    },
    /// Delete all rows from the mutable tables.
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    fourloki_lib::init_logging();

    let cli = Cli::parse();
    let mut config = BackupConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: start async runtime: {err}");
            process::exit(1);
        }
    };
    match runtime.block_on(handle_cli(cli.command, config)) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

async fn handle_cli(command: Commands, config: BackupConfig) -> Result<i32> {
    if let Commands::Clear { yes: false } = command {
        eprintln!("Refusing to clear the database without --yes.");
        return Ok(1);
    }

    let state = AppState::open(config).await.map_err(app_error)?;
    let code = match command {
        Commands::Export { out, json } => {
            let summary = export_to_dir_command(&state, &out)
                .await
                .map_err(app_error)?;
            if json {
                print_json(&summary)?;
            } else {
                for (table, rows) in &summary.tables {
                    println!("{table:<24} {rows:>6} rows");
                }
                println!("Backup written to {}", summary.path);
            }
            0
        }
        Commands::Preview { file, json } => {
            let preview = run_preview(&state, &file)?;
            if json {
                print_json(&preview)?;
            } else {
                print_preview(&preview);
            }
            0
        }
        Commands::Restore { file, yes } => {
            let preview = run_preview(&state, &file)?;
            print_preview(&preview);
            if !preview.result.validation_results.is_empty() && !yes {
                state.staging.clear(&preview.preview_token);
                eprintln!("Preview reported diagnostics; re-run with --yes to import anyway.");
                return Ok(1);
            }
            let response = import_command(&state, &preview.preview_token)
                .await
                .map_err(app_error)?;
            print_json(&response)?;
            import_exit_code(&response)
        }
        Commands::Clear { .. } => {
            let response = clear_command(&state).await.map_err(app_error)?;
            println!("{}", response.message);
            0
        }
    };
    state.pool.close().await;
    Ok(code)
}

fn run_preview(state: &AppState, file: &Path) -> Result<PreviewResponse> {
    let bytes =
        std::fs::read(file).with_context(|| format!("read workbook {}", file.display()))?;
    preview_command(state, Some(CLI_SESSION), &bytes).map_err(app_error)
}

fn print_preview(preview: &PreviewResponse) {
    for (table, rows) in &preview.result.preview {
        println!("{table:<24} {:>6} rows", rows.len());
    }
    for diagnostic in &preview.result.validation_results {
        for error in &diagnostic.errors {
            println!(
                "{} row {}: {} ({})",
                diagnostic.table, diagnostic.row_number, error.error, error.field
            );
        }
    }
}

fn import_exit_code(response: &ImportResponse) -> i32 {
    match response.status {
        ImportStatus::Success | ImportStatus::Partial => 0,
        ImportStatus::Error => EXIT_IMPORT_FAILED,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{serialized}");
    Ok(())
}

fn app_error(err: AppError) -> anyhow::Error {
    anyhow::Error::new(err)
}
