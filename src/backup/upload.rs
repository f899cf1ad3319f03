// db-backup/src/backup/upload.rs
use std::io::SeekFrom;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use crate::storage::{CompletedPart, ObjectStore, StorageError};

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Store(#[from] StorageError),

    #[error("failed to read dump file: {0}")]
    Read(#[from] std::io::Error),

    #[error("part {part_number} failed after {attempts} attempts: {source}")]
    Part {
        part_number: i32,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("{source}; multipart upload {upload_id} aborted{}", abort_outcome(.abort))]
    Aborted {
        upload_id: String,
        #[source]
        source: Box<UploadError>,
        abort: Option<StorageError>,
    },

    #[error("upload cancelled")]
    Cancelled,

    #[error("upload of {key} ({size} bytes) failed after {attempts} attempts: {source}")]
    Exhausted {
        key: String,
        size: u64,
        attempts: u32,
        #[source]
        source: Box<UploadError>,
    },

    #[error("invalid upload settings: {0}")]
    InvalidSettings(String),
}

impl UploadError {
    /// True for a cancellation, including one that ended a multipart session.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Aborted { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

fn abort_outcome(abort: &Option<StorageError>) -> String {
    match abort {
        Some(err) => format!(", but abort also failed: {}", err),
        None => String::new(),
    }
}

/// Transfer strategy, a pure function of the file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    Simple,
    Multipart,
}

#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Size of every multipart part except the last one.
    pub part_size: u64,
    /// Files of at least this size use the multipart protocol.
    pub multipart_threshold: u64,
    pub max_attempts: u32,
    pub max_part_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            part_size: GIB,
            multipart_threshold: 3 * GIB,
            max_attempts: 5,
            max_part_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl UploadSettings {
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.part_size == 0 {
            return Err(UploadError::InvalidSettings("part size must be positive".into()));
        }
        if usize::try_from(self.part_size).is_err() {
            return Err(UploadError::InvalidSettings(format!(
                "part size {} does not fit in memory",
                self.part_size
            )));
        }
        if self.multipart_threshold < self.part_size {
            return Err(UploadError::InvalidSettings(format!(
                "multipart threshold {} is below part size {}",
                self.multipart_threshold, self.part_size
            )));
        }
        if self.max_attempts == 0 || self.max_part_attempts == 0 {
            return Err(UploadError::InvalidSettings("attempt counts must be positive".into()));
        }
        Ok(())
    }

    pub fn strategy_for(&self, size: u64) -> UploadStrategy {
        if size < self.multipart_threshold {
            UploadStrategy::Simple
        } else {
            UploadStrategy::Multipart
        }
    }
}

/// Durable transfer of a local dump file to the object store.
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    settings: UploadSettings,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, settings: UploadSettings) -> Self {
        Self { store, settings }
    }

    /// Uploads `file` to `key`, retrying the whole transfer.
    ///
    /// Every attempt works on its own handle rewound to the start of the file,
    /// so a retry overwrites whatever a failed attempt left under the same key.
    pub async fn upload(
        &self,
        key: &str,
        file: &File,
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let result = (move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }
            tracing::info!(key, size, attempt, "uploading file");
            let handle = file.try_clone().await?;
            self.upload_once(key, handle, size, cancel).await
        })
        .retry(retry_policy(self.settings.retry_delay, self.settings.max_attempts))
        .sleep(tokio::time::sleep)
        .when(|err| !err.is_cancelled())
        .notify(|err: &UploadError, delay: Duration| {
            tracing::warn!(
                key,
                size,
                attempt = attempts.load(Ordering::Relaxed),
                next_delay_ms = delay.as_millis() as u64,
                error = %err,
                "upload attempt failed"
            );
        })
        .await;

        result.map_err(|last_error| UploadError::Exhausted {
            key: key.to_string(),
            size,
            attempts: counter.load(Ordering::Relaxed),
            source: Box::new(last_error),
        })
    }

    async fn upload_once(
        &self,
        key: &str,
        mut file: File,
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        // Cloned handles share the cursor left behind by earlier attempts.
        file.seek(SeekFrom::Start(0)).await?;

        match self.settings.strategy_for(size) {
            UploadStrategy::Simple => {
                tracing::info!(key, "using simple upload");
                self.store.put_object(key, file, size).await?;
                Ok(())
            }
            UploadStrategy::Multipart => {
                tracing::info!(key, "using multipart upload");
                self.multipart_upload(key, &mut file, cancel).await
            }
        }
    }

    /// Runs one multipart session. The session is completed only if every part
    /// was accepted, and aborted on any other exit path, a failed completion
    /// included.
    async fn multipart_upload(
        &self,
        key: &str,
        file: &mut File,
        cancel: &CancellationToken,
    ) -> Result<(), UploadError> {
        let upload_id = self.store.create_multipart_upload(key).await?;

        let outcome = match self.upload_parts(key, &upload_id, file, cancel).await {
            Ok(parts) => self
                .store
                .complete_multipart_upload(key, &upload_id, &parts)
                .await
                .map(|()| parts.len())
                .map_err(UploadError::from),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(parts) => {
                tracing::debug!(key, parts, "multipart upload completed");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(key, upload_id = %upload_id, error = %err, "aborting multipart upload");
                let abort = self.store.abort_multipart_upload(key, &upload_id).await.err();
                Err(UploadError::Aborted {
                    upload_id,
                    source: Box::new(err),
                    abort,
                })
            }
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        file: &mut File,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedPart>, UploadError> {
        let mut parts = Vec::new();
        let mut part_number = 1;

        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let data = read_part(file, self.settings.part_size as usize).await?;
            if data.is_empty() {
                break;
            }
            let is_last = (data.len() as u64) < self.settings.part_size;

            let e_tag = self.upload_part(key, upload_id, part_number, data).await?;
            parts.push(CompletedPart { part_number, e_tag });

            if is_last {
                break;
            }
            part_number += 1;
        }

        Ok(parts)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String, UploadError> {
        let store = self.store.as_ref();
        let counter = AtomicU32::new(0);
        let attempts = &counter;

        let e_tag = (move || {
            attempts.fetch_add(1, Ordering::Relaxed);
            store.upload_part(key, upload_id, part_number, data.clone())
        })
        .retry(retry_policy(self.settings.retry_delay, self.settings.max_part_attempts))
        .sleep(tokio::time::sleep)
        .notify(|err: &StorageError, _: Duration| {
            tracing::warn!(
                key,
                part_number,
                attempt = attempts.load(Ordering::Relaxed),
                error = %err,
                "retrying part upload"
            );
        })
        .await
        .map_err(|source| UploadError::Part {
            part_number,
            attempts: counter.load(Ordering::Relaxed),
            source,
        })?;

        tracing::debug!(key, part_number, "uploaded part");
        Ok(e_tag)
    }
}

/// `max_attempts` tries in total, `delay` apart.
fn retry_policy(delay: Duration, max_attempts: u32) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(max_attempts.saturating_sub(1) as usize)
}

/// Reads up to `part_size` bytes, looping over short reads. Returns fewer
/// bytes only at end of file.
async fn read_part(file: &mut File, part_size: usize) -> std::io::Result<Bytes> {
    let mut buffer = BytesMut::zeroed(part_size);
    let mut filled = 0;
    while filled < part_size {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer.freeze())
}
