pub(crate) mod db_dump;
pub(crate) mod job;
mod logic;
pub(crate) mod naming;
pub(crate) mod rotation;
pub(crate) mod upload;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::storage::build_store;
use crate::utils::hostname;
use db_dump::PostgresSource;

pub use job::Job;
pub use logic::BackupService;

/// Public entry point for the backup process.
///
/// Builds the dump source and object store from `app_config` and backs up
/// every target database. Per-database failures are reported on the returned
/// jobs, not as an `Err`.
pub async fn run_backup_flow(app_config: &AppConfig, cancel: &CancellationToken) -> Result<Vec<Job>> {
    let store = build_store(&app_config.storage)
        .await
        .context("Failed to initialise object store")?;
    let source = Arc::new(PostgresSource::new(app_config.postgres.clone()));

    let service = BackupService::new(
        source,
        store,
        app_config.backup.clone(),
        &app_config.storage,
        hostname(),
    );

    service.process(cancel).await.context("Backup run aborted")
}
