// db-backup/src/storage/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::{ByteStream, Length};
use s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use tokio::fs::File;

use super::{CompletedPart, ObjectStore, RemoteObject, StorageError};
use crate::config::S3Config;

const CONTENT_TYPE: &str = "application/octet-stream";

/// Object store backed by any S3-compatible service (AWS, DigitalOcean
/// Spaces, MinIO, ...).
#[derive(Clone, Debug)]
pub struct S3Store {
    client: s3::Client,
    bucket_name: String,
}

impl S3Store {
    /// Builds the client from the storage configuration.
    ///
    /// Static credentials are used when both keys are configured; otherwise
    /// the default AWS provider chain applies.
    pub async fn connect(s3_config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(s3_config.region.clone()));

        if let Some(endpoint_url) = &s3_config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        if let (Some(key_id), Some(secret)) =
            (&s3_config.access_key_id, &s3_config.secret_access_key)
        {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                key_id, secret, None, // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        }

        let sdk_config = loader.load().await;
        let client_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(s3_config.force_path_style)
            .build();

        Self {
            client: s3::Client::from_conf(client_config),
            bucket_name: s3_config.bucket_name.clone(),
        }
    }

    fn bucket(&self) -> Result<&str, StorageError> {
        if self.bucket_name.is_empty() {
            return Err(StorageError::InvalidBucketName(
                "bucket name is empty".to_string(),
            ));
        }
        Ok(&self.bucket_name)
    }
}

fn to_utc(value: &s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos())
}

#[async_trait]
impl ObjectStore for S3Store {
    fn kind(&self) -> &'static str {
        "s3"
    }

    async fn validate(&self) -> Result<(), StorageError> {
        // HeadBucket only needs access to the target bucket, unlike ListBuckets.
        self.client
            .head_bucket()
            .bucket(self.bucket()?)
            .send()
            .await
            .map_err(|e| StorageError::request("HeadBucket", DisplayErrorContext(&e)))?;
        tracing::debug!(bucket = %self.bucket_name, "target bucket is accessible");
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, StorageError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(self.bucket()?)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page =
                page.map_err(|e| StorageError::request("ListObjectsV2", DisplayErrorContext(&e)))?;
            for object in page.contents() {
                let (Some(key), Some(created_at)) =
                    (object.key(), object.last_modified().and_then(to_utc))
                else {
                    continue;
                };
                objects.push(RemoteObject {
                    key: key.to_string(),
                    created_at,
                });
            }
        }
        Ok(objects)
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(self.bucket()?)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::request("DeleteObject", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn put_object(&self, key: &str, file: File, size: u64) -> Result<(), StorageError> {
        let body = ByteStream::read_from()
            .file(file)
            .length(Length::Exact(size))
            .build()
            .await
            .map_err(|e| StorageError::request("PutObject", e))?;

        self.client
            .put_object()
            .bucket(self.bucket()?)
            .key(key)
            .content_type(CONTENT_TYPE)
            .content_length(size as i64)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::request("PutObject", DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String, StorageError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(self.bucket()?)
            .key(key)
            .content_type(CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| {
                StorageError::request("CreateMultipartUpload", DisplayErrorContext(&e))
            })?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or(StorageError::MissingField {
                operation: "CreateMultipartUpload",
                field: "UploadId",
            })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let content_length = data.len() as i64;
        let output = self
            .client
            .upload_part()
            .bucket(self.bucket()?)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_length(content_length)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::request("UploadPart", DisplayErrorContext(&e)))?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or(StorageError::MissingField {
                operation: "UploadPart",
                field: "ETag",
            })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let parts = parts
            .iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.e_tag)
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .complete_multipart_upload()
            .bucket(self.bucket()?)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                StorageError::request("CompleteMultipartUpload", DisplayErrorContext(&e))
            })?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(self.bucket()?)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                StorageError::request("AbortMultipartUpload", DisplayErrorContext(&e))
            })?;
        Ok(())
    }
}
