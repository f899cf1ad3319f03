use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::backup::db_dump::DumpSourceError;
use crate::backup::upload::UploadError;
use crate::storage::StorageError;

/// Errors raised by a backup run.
///
/// `Preflight`, `ListDatabases` and `NoTargets` abort the whole run. Every
/// other variant is attached to the [`Job`](crate::backup::Job) it happened
/// in and never stops the remaining databases.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("{component} is not reachable: {source}")]
    Preflight {
        component: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to list databases: {0}")]
    ListDatabases(#[source] DumpSourceError),

    #[error("no databases to backup")]
    NoTargets,

    #[error("dump of database {database} failed: {source}")]
    Dump {
        database: String,
        #[source]
        source: DumpSourceError,
    },

    #[error("can not open dump file {}: {source}", path.display())]
    OpenDump {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid storage directory template: {0}")]
    Template(String),

    #[error("upload to {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: UploadError,
    },

    #[error("failed to list objects with prefix {prefix}: {source}")]
    Listing {
        prefix: String,
        #[source]
        source: StorageError,
    },

    #[error("failed to remove deprecated object {key}: {source}")]
    Rotation {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("can not remove local file {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Accumulates every failure of a single job.
///
/// Pushing never replaces an earlier entry, so a cleanup failure that follows
/// an upload failure is reported next to it.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<BackupError>);

impl ErrorList {
    pub fn push(&mut self, err: BackupError) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackupError> {
        self.0.iter()
    }

    pub fn extend(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "no errors"),
            [single] => write!(f, "{}", single),
            many => {
                write!(f, "{} errors occurred:", many.len())?;
                for err in many {
                    write!(f, "\n\t* {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ErrorList {}

impl From<BackupError> for ErrorList {
    fn from(err: BackupError) -> Self {
        Self(vec![err])
    }
}
