//! Database Backup Tool
//!
//! Dumps every configured PostgreSQL database, uploads the dumps to object
//! storage and prunes old dumps beyond the retention limit.

// db-backup/src/main.rs
mod backup;
mod config;
mod errors;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use config::AppConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit status when the run completed but at least one database failed.
const PARTIAL_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(version, about = "Back up PostgreSQL databases to object storage")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "DB_BACKUP_CONFIG", default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run_app(&args).await {
        Ok(jobs) => {
            let failed: Vec<_> = jobs.iter().filter(|job| !job.is_success()).collect();
            if failed.is_empty() {
                println!("✅ Backed up {} database(s) successfully.", jobs.len());
                ExitCode::SUCCESS
            } else {
                for job in &failed {
                    if let Some(err) = &job.error {
                        eprintln!("❌ {}: {}", job.database_name, err);
                    }
                }
                eprintln!("❌ {} of {} database backup(s) failed.", failed.len(), jobs.len());
                ExitCode::from(PARTIAL_FAILURE)
            }
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(args: &Args) -> Result<Vec<backup::Job>> {
    let app_config = AppConfig::load_from_json(&args.config).context(format!(
        "Failed to load application configuration from {}",
        args.config.display()
    ))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling backup run");
            on_signal.cancel();
        }
    });

    println!("🚀 Starting Backup Process...");
    let jobs = backup::run_backup_flow(&app_config, &cancel).await?;

    for job in &jobs {
        tracing::info!(
            db_name = %job.database_name,
            success = job.is_success(),
            key = %job.storage_file_location,
            size = job.file_size,
            removed = job.removed_files.len(),
            upload_ms = job.upload_duration().map(|d| d.num_milliseconds()),
            "job finished"
        );
    }
    Ok(jobs)
}
