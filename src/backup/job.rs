// db-backup/src/backup/job.rs
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::errors::{BackupError, ErrorList};

/// One backup attempt for one database.
#[derive(Debug)]
pub struct Job {
    pub database_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub dump_started_at: Option<DateTime<Utc>>,
    pub dump_ended_at: Option<DateTime<Utc>>,
    pub upload_started_at: Option<DateTime<Utc>>,
    pub upload_ended_at: Option<DateTime<Utc>>,
    pub file_location: PathBuf,
    /// Remote key; empty when the dump never produced a file to upload.
    pub storage_file_location: String,
    pub storage_provider_type: String,
    /// Raw dump tool output, kept for diagnostics on failure too.
    pub output: String,
    pub file_size: u64,
    pub removed_files: Vec<String>,
    /// `None` iff every phase succeeded.
    pub error: Option<ErrorList>,
}

impl Job {
    pub fn new(database_name: &str) -> Self {
        Self {
            database_name: database_name.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            dump_started_at: None,
            dump_ended_at: None,
            upload_started_at: None,
            upload_ended_at: None,
            file_location: PathBuf::new(),
            storage_file_location: String::new(),
            storage_provider_type: String::new(),
            output: String::new(),
            file_size: 0,
            removed_files: Vec::new(),
            error: None,
        }
    }

    /// Appends a failure, keeping every earlier one.
    pub fn record_error(&mut self, err: BackupError) {
        tracing::error!(db_name = %self.database_name, error = %err, "backup step failed");
        self.error.get_or_insert_with(ErrorList::default).push(err);
    }

    pub fn record_errors(&mut self, errors: ErrorList) {
        for err in errors.iter() {
            tracing::error!(db_name = %self.database_name, error = %err, "backup step failed");
        }
        if !errors.is_empty() {
            self.error.get_or_insert_with(ErrorList::default).extend(errors);
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn dump_duration(&self) -> Option<chrono::Duration> {
        Some(self.dump_ended_at? - self.dump_started_at?)
    }

    pub fn upload_duration(&self) -> Option<chrono::Duration> {
        Some(self.upload_ended_at? - self.upload_started_at?)
    }
}
