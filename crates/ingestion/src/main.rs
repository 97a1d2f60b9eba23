//! Follow-Up Ingestion CLI
//!
//! Imports a spreadsheet upload saved as JSON (the same shape the portal
//! posts as `excelData`) and prints the import report.

use anyhow::Context;
use clap::{Parser, Subcommand};
use followup_common::{config::AppConfig, db::DbPool, MemoryStore, Repository, RosterStore, VERSION};
use followup_ingestion::{ExamImport, Reconciler, SessionImport, SheetData};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ingestion")]
#[command(about = "Import spreadsheet uploads into the Follow-Up roster")]
#[command(version = VERSION)]
struct Cli {
    /// Reconcile against an empty in-memory roster; nothing is written
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Per-session results
    Sessions {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        sheet: String,
        #[arg(long)]
        session: i32,
        #[arg(long, default_value = "hw1")]
        hw_column: String,
        #[arg(long)]
        finish_time: Option<String>,
    },
    /// Cumulative exam results
    Exams {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        sheet: String,
        #[arg(long)]
        exam: String,
    },
}

impl Commands {
    fn sheet(&self) -> &str {
        match self {
            Commands::Sessions { sheet, .. } | Commands::Exams { sheet, .. } => sheet,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the report
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(true)
        .json()
        .init();

    info!("Starting Follow-Up Ingestion v{}", VERSION);

    let store: Arc<dyn RosterStore> = if cli.dry_run {
        info!("Dry run: using an in-memory roster");
        Arc::new(MemoryStore::with_sheets([cli.command.sheet()]))
    } else {
        let config = AppConfig::load().context("Failed to load configuration")?;
        info!("Connecting to database...");
        let pool = DbPool::new(&config.database).await?;
        Arc::new(Repository::new(pool))
    };

    let reconciler = Reconciler::new(store);

    let report = match cli.command {
        Commands::Sessions {
            file,
            sheet,
            session,
            hw_column,
            finish_time,
        } => {
            let data = read_upload(&file)?;
            let params = SessionImport {
                sheet_name: sheet,
                session_number: session,
                homework_column: hw_column,
                finish_time,
            };
            reconciler.import_sessions(&data, &params).await?
        }
        Commands::Exams { file, sheet, exam } => {
            let data = read_upload(&file)?;
            let params = ExamImport {
                sheet_name: sheet,
                exam_name: exam,
            };
            reconciler.import_exam(&data, &params).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn read_upload(path: &Path) -> anyhow::Result<SheetData> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a valid upload", path.display()))
}
