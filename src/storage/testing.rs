//! In-memory store that records every call, with failure injection.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::{CompletedPart, ObjectStore, RemoteObject, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Validate,
    List(String),
    Remove(String),
    Put { key: String, size: u64 },
    CreateMultipart(String),
    UploadPart { part_number: i32, len: usize },
    Complete(Vec<CompletedPart>),
    Abort(String),
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    objects: Vec<RemoteObject>,
    contents: BTreeMap<String, Vec<u8>>,
    parts: BTreeMap<i32, Bytes>,
    fail_validate: bool,
    fail_list: bool,
    fail_put_times: u32,
    fail_parts: HashSet<i32>,
    fail_complete: bool,
    fail_abort: bool,
    fail_remove: HashSet<String>,
}

#[derive(Default)]
pub struct RecordingStore {
    state: Mutex<State>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_objects(objects: Vec<RemoteObject>) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().objects = objects;
        store
    }

    pub fn fail_validate(&self) {
        self.state.lock().unwrap().fail_validate = true;
    }

    pub fn fail_list(&self) {
        self.state.lock().unwrap().fail_list = true;
    }

    /// The next `times` single-request uploads fail.
    pub fn fail_put(&self, times: u32) {
        self.state.lock().unwrap().fail_put_times = times;
    }

    /// Every attempt to upload `part_number` fails.
    pub fn fail_part(&self, part_number: i32) {
        self.state.lock().unwrap().fail_parts.insert(part_number);
    }

    pub fn fail_complete(&self) {
        self.state.lock().unwrap().fail_complete = true;
    }

    pub fn fail_abort(&self) {
        self.state.lock().unwrap().fail_abort = true;
    }

    pub fn fail_remove(&self, key: &str) {
        self.state.lock().unwrap().fail_remove.insert(key.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.iter().map(|o| o.key.clone()).collect()
    }

    pub fn content(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().contents.get(key).cloned()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn store_object(state: &mut State, key: &str, content: Vec<u8>) {
        state.objects.retain(|o| o.key != key);
        state.objects.push(RemoteObject {
            key: key.to_string(),
            created_at: Utc::now(),
        });
        state.contents.insert(key.to_string(), content);
    }
}

pub fn object(key: &str, created_at: DateTime<Utc>) -> RemoteObject {
    RemoteObject {
        key: key.to_string(),
        created_at,
    }
}

fn injected(operation: &'static str) -> StorageError {
    StorageError::request(operation, "injected failure")
}

#[async_trait]
impl ObjectStore for RecordingStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn validate(&self) -> Result<(), StorageError> {
        self.record(Call::Validate);
        if self.state.lock().unwrap().fail_validate {
            return Err(injected("Validate"));
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, StorageError> {
        self.record(Call::List(prefix.to_string()));
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(injected("List"));
        }
        Ok(state
            .objects
            .iter()
            .filter(|o| o.key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.record(Call::Remove(key.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.fail_remove.contains(key) {
            return Err(injected("Remove"));
        }
        state.objects.retain(|o| o.key != key);
        state.contents.remove(key);
        Ok(())
    }

    async fn put_object(&self, key: &str, mut file: File, size: u64) -> Result<(), StorageError> {
        self.record(Call::Put {
            key: key.to_string(),
            size,
        });
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_put_times > 0 {
                state.fail_put_times -= 1;
                return Err(injected("PutObject"));
            }
        }
        let mut content = Vec::new();
        file.read_to_end(&mut content).await?;
        Self::store_object(&mut self.state.lock().unwrap(), key, content);
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String, StorageError> {
        self.record(Call::CreateMultipart(key.to_string()));
        self.state.lock().unwrap().parts.clear();
        Ok("upload-1".to_string())
    }

    async fn upload_part(
        &self,
        _key: &str,
        _upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        self.record(Call::UploadPart {
            part_number,
            len: data.len(),
        });
        let mut state = self.state.lock().unwrap();
        if state.fail_parts.contains(&part_number) {
            return Err(injected("UploadPart"));
        }
        state.parts.insert(part_number, data);
        Ok(format!("etag-{}", part_number))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        _upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        self.record(Call::Complete(parts.to_vec()));
        let mut state = self.state.lock().unwrap();
        if state.fail_complete {
            return Err(injected("CompleteMultipartUpload"));
        }
        let mut content = Vec::new();
        for part in parts {
            let data = state.parts.get(&part.part_number).ok_or(StorageError::PartMismatch {
                upload_id: "upload-1".to_string(),
                part_number: part.part_number,
            })?;
            content.extend_from_slice(data);
        }
        state.parts.clear();
        Self::store_object(&mut state, key, content);
        Ok(())
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<(), StorageError> {
        self.record(Call::Abort(upload_id.to_string()));
        let mut state = self.state.lock().unwrap();
        state.parts.clear();
        if state.fail_abort {
            return Err(injected("AbortMultipartUpload"));
        }
        Ok(())
    }
}
