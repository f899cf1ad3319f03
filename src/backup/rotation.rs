// db-backup/src/backup/rotation.rs
use crate::errors::{BackupError, ErrorList};
use crate::storage::{ObjectStore, RemoteObject};

const DEFAULT_KEEP: usize = 5;

/// Maximum number of dumps retained per database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    keep: usize,
}

impl RetentionPolicy {
    /// Zero means "not configured" and falls back to the default of 5.
    pub fn new(max_files: usize) -> Self {
        Self {
            keep: if max_files == 0 { DEFAULT_KEEP } else { max_files },
        }
    }

    pub fn keep(&self) -> usize {
        self.keep
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(0)
    }
}

#[derive(Debug, Default)]
pub struct RotationOutcome {
    /// Keys that were actually deleted, oldest first.
    pub removed: Vec<String>,
    pub errors: ErrorList,
}

/// Picks the objects to delete, oldest first.
///
/// Objects are ordered by their reported creation time (stable, so ties keep
/// listing order), never by key. The `len - keep` oldest are removed, skipping
/// `just_uploaded` even when its timestamp makes it look old.
pub fn plan_removals(
    mut objects: Vec<RemoteObject>,
    just_uploaded: Option<&str>,
    policy: RetentionPolicy,
) -> Vec<RemoteObject> {
    if objects.len() <= policy.keep() {
        return Vec::new();
    }
    let excess = objects.len() - policy.keep();

    objects.sort_by_key(|object| object.created_at);
    objects
        .into_iter()
        .filter(|object| Some(object.key.as_str()) != just_uploaded)
        .take(excess)
        .collect()
}

/// Deletes everything [`plan_removals`] selects. A failed removal is recorded
/// and the remaining candidates are still attempted.
pub async fn rotate(
    store: &dyn ObjectStore,
    objects: Vec<RemoteObject>,
    just_uploaded: Option<&str>,
    policy: RetentionPolicy,
) -> RotationOutcome {
    let mut outcome = RotationOutcome::default();

    for candidate in plan_removals(objects, just_uploaded, policy) {
        tracing::info!(key = %candidate.key, "removing deprecated file from storage");
        match store.remove(&candidate.key).await {
            Ok(()) => outcome.removed.push(candidate.key),
            Err(source) => outcome.errors.push(BackupError::Rotation {
                key: candidate.key,
                source,
            }),
        }
    }

    outcome
}
