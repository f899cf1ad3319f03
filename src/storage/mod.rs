// db-backup/src/storage/mod.rs
pub mod error;
pub mod filesystem;
pub mod s3;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs::File;

pub use error::StorageError;

use crate::config::{StorageConfig, StorageProvider};

/// Read-only projection of an object-store listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

/// A part that was accepted by the store during a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// Object storage operations needed by the backup engine.
///
/// Implementations only speak the wire protocol; retries, strategy selection
/// and session cleanup live in [`crate::backup::upload::Uploader`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short label of the backend, recorded on every job.
    fn kind(&self) -> &'static str;

    async fn validate(&self) -> Result<(), StorageError>;

    /// Lists every object whose key starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Uploads the whole file in a single request. The file is positioned at
    /// the start and holds exactly `size` bytes.
    async fn put_object(&self, key: &str, file: File, size: u64) -> Result<(), StorageError>;

    /// Opens a multipart session and returns its upload id.
    async fn create_multipart_upload(&self, key: &str) -> Result<String, StorageError>;

    /// Uploads one part and returns the integrity tag assigned by the store.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String, StorageError>;

    /// Assembles the parts server-side, in the given order.
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StorageError>;
}

/// Builds the configured store. Called once at startup.
pub async fn build_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match &config.provider {
        StorageProvider::S3(s3_config) => Arc::new(s3::S3Store::connect(s3_config).await),
        StorageProvider::Filesystem(fs_config) => {
            Arc::new(filesystem::FilesystemStore::open(&fs_config.root)?)
        }
    };
    tracing::info!(kind = store.kind(), "object store configured");
    Ok(store)
}
