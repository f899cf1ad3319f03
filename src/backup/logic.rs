// db-backup/src/backup/logic.rs
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::db_dump::DumpSource;
use super::job::Job;
use super::naming::{DumpNaming, is_dump_key, render_dir_template};
use super::rotation::{self, RetentionPolicy};
use super::upload::Uploader;
use crate::config::{BackupConfig, StorageConfig};
use crate::errors::BackupError;
use crate::storage::ObjectStore;

/// Drives the dump → upload → rotate lifecycle for every target database.
pub struct BackupService {
    source: Arc<dyn DumpSource>,
    store: Arc<dyn ObjectStore>,
    uploader: Uploader,
    backup: BackupConfig,
    dir_template: String,
    prefix: String,
    retention: RetentionPolicy,
    host: String,
}

impl BackupService {
    pub fn new(
        source: Arc<dyn DumpSource>,
        store: Arc<dyn ObjectStore>,
        backup: BackupConfig,
        storage: &StorageConfig,
        host: String,
    ) -> Self {
        Self {
            uploader: Uploader::new(store.clone(), storage.upload.clone()),
            source,
            store,
            backup,
            dir_template: storage.dir_template.clone(),
            prefix: storage.prefix.clone(),
            retention: storage.retention,
            host,
        }
    }

    /// Backs up every target database, one at a time.
    ///
    /// Only pre-flight failures and an empty target set are returned as
    /// errors. Once a database has been attempted the full job list is
    /// returned, and failures have to be read from each [`Job::error`].
    pub async fn process(&self, cancel: &CancellationToken) -> Result<Vec<Job>, BackupError> {
        self.validate().await?;

        let existing = self
            .source
            .list_databases()
            .await
            .map_err(BackupError::ListDatabases)?;
        let targets = resolve_targets(
            &existing,
            &self.backup.include_databases,
            &self.backup.exclude_databases,
        );
        if targets.is_empty() {
            return Err(BackupError::NoTargets);
        }
        tracing::info!(?targets, "databases to be backed up");

        let mut jobs = Vec::with_capacity(targets.len());
        for database in &targets {
            let job_cancel = cancel.child_token();
            let job = self
                .process_database(database, &job_cancel)
                .instrument(tracing::info_span!("job", db_name = %database))
                .await;
            job_cancel.cancel();
            jobs.push(job);
        }

        let failed = jobs.iter().filter(|job| !job.is_success()).count();
        tracing::info!(total = jobs.len(), failed, "backup run finished");

        Ok(jobs)
    }

    async fn validate(&self) -> Result<(), BackupError> {
        self.source
            .validate()
            .await
            .map_err(|e| BackupError::Preflight {
                component: "database source",
                source: Box::new(e),
            })?;

        self.store
            .validate()
            .await
            .map_err(|e| BackupError::Preflight {
                component: "object store",
                source: Box::new(e),
            })?;

        tokio::fs::create_dir_all(&self.backup.dump_dir)
            .await
            .map_err(|e| BackupError::Preflight {
                component: "dump directory",
                source: Box::new(e),
            })?;

        tracing::info!(
            source = self.source.kind(),
            store = self.store.kind(),
            "pre-flight checks passed"
        );
        Ok(())
    }

    async fn process_database(&self, database: &str, cancel: &CancellationToken) -> Job {
        let mut job = Job::new(database);

        match render_dir_template(&self.dir_template, database, &self.prefix, &self.host) {
            Ok(remote_dir) => {
                let naming = DumpNaming::new(database, Utc::now(), &self.backup.dump_dir, remote_dir);
                job.file_location = naming.local_path.clone();

                let local_dump = LocalDump::new(naming.local_path.clone());
                self.run_phases(&mut job, &naming, cancel).await;

                tracing::info!(path = %job.file_location.display(), "removing local file copy");
                if let Err(source) = local_dump.remove().await {
                    job.record_error(BackupError::Cleanup {
                        path: job.file_location.clone(),
                        source,
                    });
                }
            }
            Err(err) => job.record_error(err),
        }

        job.ended_at = Some(Utc::now());
        job
    }

    /// Runs dump, upload and rotation. Stops at the first failing phase; the
    /// failure is recorded on the job.
    async fn run_phases(&self, job: &mut Job, naming: &DumpNaming, cancel: &CancellationToken) {
        let database = job.database_name.clone();
        tracing::info!(path = %naming.local_path.display(), "backup for database started");

        job.dump_started_at = Some(Utc::now());
        match self.source.dump(&database, &naming.local_path, cancel).await {
            Ok(output) => {
                job.output = output;
                job.dump_ended_at = Some(Utc::now());
            }
            Err(source) => {
                job.output = source.output().unwrap_or_default().to_string();
                job.record_error(BackupError::Dump { database, source });
                return;
            }
        }
        if let Some(elapsed) = job.dump_duration() {
            tracing::info!(elapsed_ms = elapsed.num_milliseconds(), "database dump finished");
        }

        let opened = match File::open(&naming.local_path).await {
            Ok(file) => file.metadata().await.map(|metadata| (file, metadata.len())),
            Err(e) => Err(e),
        };
        let (file, size) = match opened {
            Ok(opened) => opened,
            Err(source) => {
                job.record_error(BackupError::OpenDump {
                    path: naming.local_path.clone(),
                    source,
                });
                return;
            }
        };
        job.file_size = size;

        let key = naming.remote_key();
        job.storage_provider_type = self.store.kind().to_string();
        job.storage_file_location = key.clone();
        job.upload_started_at = Some(Utc::now());

        tracing::info!(key = %key, size, "starting upload");
        if let Err(source) = self.uploader.upload(&key, &file, size, cancel).await {
            job.record_error(BackupError::Upload { key, source });
            return;
        }
        job.upload_ended_at = Some(Utc::now());
        drop(file);

        let prefix = naming.listing_prefix();
        tracing::info!(prefix = %prefix, "searching for files to rotate");
        let listing = match self.store.list(&prefix).await {
            Ok(listing) => listing,
            Err(source) => {
                job.record_error(BackupError::Listing { prefix, source });
                return;
            }
        };
        let own_dumps = listing
            .into_iter()
            .filter(|object| is_dump_key(&object.key, &prefix))
            .collect();

        let outcome = rotation::rotate(self.store.as_ref(), own_dumps, Some(&key), self.retention).await;
        job.removed_files = outcome.removed;
        job.record_errors(outcome.errors);
    }
}

/// Resolves which databases to back up.
///
/// A non-empty include list wins: its entries that exist, in include-list
/// order. Otherwise every existing database not in the exclude list.
pub fn resolve_targets(existing: &[String], include: &[String], exclude: &[String]) -> Vec<String> {
    if !include.is_empty() {
        return include
            .iter()
            .filter(|name| {
                let found = existing.contains(name);
                if !found {
                    tracing::warn!(db_name = %name, "included database does not exist, skipping");
                }
                found
            })
            .cloned()
            .collect();
    }

    existing
        .iter()
        .filter(|name| !exclude.contains(name))
        .cloned()
        .collect()
}

/// The local dump file of one job.
///
/// `remove` is called on every normal exit path so its failure can be recorded;
/// dropping an unremoved guard (a panic unwinding through the job) still
/// deletes the file.
struct LocalDump {
    path: PathBuf,
    removed: bool,
}

impl LocalDump {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    /// A dump that was never written is not an error.
    async fn remove(mut self) -> std::io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for LocalDump {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
