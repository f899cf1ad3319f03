//! Object store kept on a local (or mounted) filesystem.
//!
//! Keys map to paths below the root directory. Multipart sessions stage their
//! parts under `<root>/.multipart/<upload_id>/` and are concatenated in the
//! order supplied on completion.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;
use walkdir::WalkDir;

use super::{CompletedPart, ObjectStore, RemoteObject, StorageError};

const STAGING_DIR: &str = ".multipart";

#[derive(Clone, Debug)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    /// Opens the store, creating the root directory if needed.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .with_context(|| format!("Failed to create storage directory: {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(part) if part != STAGING_DIR));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn staging_path(&self, upload_id: &str) -> Result<PathBuf, StorageError> {
        Uuid::parse_str(upload_id)
            .map_err(|_| StorageError::InvalidKey(format!("upload id {upload_id}")))?;
        Ok(self.root.join(STAGING_DIR).join(upload_id))
    }

    async fn existing_staging_path(&self, key: &str, upload_id: &str) -> Result<PathBuf, StorageError> {
        let staging = self.staging_path(upload_id)?;
        if !fs::try_exists(&staging).await? {
            return Err(StorageError::UnknownUpload {
                key: key.to_string(),
                upload_id: upload_id.to_string(),
            });
        }
        Ok(staging)
    }

    /// Writes to a sibling temp file and renames it over the target, so a
    /// partially written object is never visible under its key.
    async fn create_temp_for(target: &Path) -> Result<(PathBuf, File), StorageError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = target.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));
        let temp_file = File::create(&temp_path).await?;
        Ok((temp_path, temp_file))
    }
}

fn part_file_name(part_number: i32, e_tag: &str) -> String {
    format!("{:05}.{}", part_number, e_tag)
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    fn kind(&self) -> &'static str {
        "filesystem"
    }

    async fn validate(&self) -> Result<(), StorageError> {
        let metadata = fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(StorageError::InvalidKey(format!(
                "storage root {} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, StorageError> {
        let mut objects = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() != 1 || entry.file_name() != STAGING_DIR);

        for entry in walker {
            let entry = entry.map_err(|e| StorageError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(prefix) || relative.file_name().is_some_and(|n| n.to_string_lossy().starts_with('.')) {
                continue;
            }
            let modified = entry
                .metadata()
                .map_err(|e| StorageError::Io(e.into()))?
                .modified()?;
            objects.push(RemoteObject {
                key,
                created_at: DateTime::<Utc>::from(modified),
            });
        }
        Ok(objects)
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        fs::remove_file(self.object_path(key)?).await?;
        Ok(())
    }

    async fn put_object(&self, key: &str, file: File, size: u64) -> Result<(), StorageError> {
        let target = self.object_path(key)?;
        let (temp_path, mut temp_file) = Self::create_temp_for(&target).await?;

        let mut source = file.take(size);
        let copied = tokio::io::copy(&mut source, &mut temp_file).await?;
        temp_file.flush().await?;
        drop(temp_file);

        if copied != size {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes for {}, read {}", size, key, copied),
            )));
        }
        fs::rename(&temp_path, &target).await?;
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String, StorageError> {
        self.object_path(key)?;
        let upload_id = Uuid::new_v4().to_string();
        fs::create_dir_all(self.staging_path(&upload_id)?).await?;
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let staging = self.existing_staging_path(key, upload_id).await?;

        // A re-uploaded part replaces the previous attempt.
        let stale_prefix = format!("{:05}.", part_number);
        let mut entries = fs::read_dir(&staging).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(&stale_prefix) {
                fs::remove_file(entry.path()).await?;
            }
        }

        let e_tag = Uuid::new_v4().simple().to_string();
        fs::write(staging.join(part_file_name(part_number, &e_tag)), &data).await?;
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let target = self.object_path(key)?;
        let staging = self.existing_staging_path(key, upload_id).await?;

        for part in parts {
            if !fs::try_exists(staging.join(part_file_name(part.part_number, &part.e_tag))).await? {
                return Err(StorageError::PartMismatch {
                    upload_id: upload_id.to_string(),
                    part_number: part.part_number,
                });
            }
        }

        let (temp_path, mut temp_file) = Self::create_temp_for(&target).await?;
        for part in parts {
            let mut part_file = File::open(staging.join(part_file_name(part.part_number, &part.e_tag))).await?;
            tokio::io::copy(&mut part_file, &mut temp_file).await?;
        }
        temp_file.flush().await?;
        drop(temp_file);

        fs::rename(&temp_path, &target).await?;
        fs::remove_dir_all(&staging).await?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        let staging = self.existing_staging_path(key, upload_id).await?;
        fs::remove_dir_all(staging).await?;
        Ok(())
    }
}
