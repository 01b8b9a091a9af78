//! Checkpoints
//!
//! A checkpoint records which idempotency keys have completed and the id map
//! at that moment. It is persisted after every successful action so a run can
//! resume after an abrupt exit.

use crate::context::IdMap;
use crate::error::CheckpointError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use porter_core::{ActionId, IdempotencyKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Durable snapshot of execution progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: Uuid,
    /// Fingerprint of the plan the run started with
    pub plan_fingerprint: String,
    pub last_completed: Option<ActionId>,
    pub id_map: IdMap,
    /// Keys of every action known to have completed
    pub executed: BTreeSet<IdempotencyKey>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Empty checkpoint for a new run
    #[must_use]
    pub fn new(plan_fingerprint: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            plan_fingerprint: plan_fingerprint.into(),
            last_completed: None,
            id_map: IdMap::new(),
            executed: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Whether an action with this key already completed
    #[must_use]
    pub fn is_executed(&self, key: &IdempotencyKey) -> bool {
        self.executed.contains(key)
    }
}

/// Persistence for checkpoints
///
/// Failures here are infrastructure failures and stop the run.
pub trait CheckpointStore: Send + Sync {
    /// Most recent checkpoint, if any
    ///
    /// # Errors
    /// Returns error if the store cannot be read or decoded
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Replace the stored checkpoint
    ///
    /// # Errors
    /// Returns error if the write fails
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

/// JSON file written atomically via a temp file in the same directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Store at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocking write: temp file, fsync, rename
    ///
    /// Runs inline on the engine's owner loop, so the checkpoint is durable
    /// before the next dispatch decision. The call stalls that runtime
    /// worker for the duration of the fsync.
    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, checkpoint)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| CheckpointError::Io(e.error))?;
        debug!(path = %self.path.display(), "checkpoint written");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    latest: Option<Checkpoint>,
    saves: usize,
    fail_after: Option<usize>,
}

/// Shared in-memory store; clones see the same checkpoint
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryCheckpointStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects every save after the first `saves`
    #[must_use]
    pub fn failing_after(saves: usize) -> Self {
        let store = Self::new();
        store.inner.lock().fail_after = Some(saves);
        store
    }

    /// Latest saved checkpoint
    #[must_use]
    pub fn latest(&self) -> Option<Checkpoint> {
        self.inner.lock().latest.clone()
    }

    /// Number of successful saves
    #[must_use]
    pub fn saves(&self) -> usize {
        self.inner.lock().saves
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.inner.lock().latest.clone())
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let mut state = self.inner.lock();
        if state.fail_after.is_some_and(|limit| state.saves >= limit) {
            return Err(CheckpointError::Unavailable(format!(
                "store rejected save #{}",
                state.saves + 1
            )));
        }
        state.latest = Some(checkpoint.clone());
        state.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use porter_core::{ActionKind, IdempotencyKeyer, ResourceRef};
    use serde_json::json;

    fn sample() -> Checkpoint {
        let mut cp = Checkpoint::new("fingerprint");
        cp.id_map
            .insert(ResourceRef::new("repository", "app"), "repo-1".into())
            .unwrap();
        cp.executed
            .insert(IdempotencyKeyer::new().key(ActionKind::RepositoryCreate, "app", &json!({})));
        cp.last_completed = Some(ActionId(0));
        cp
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nested").join("checkpoint.json"));
        assert!(store.load().unwrap().is_none());

        let cp = sample();
        store.save(&cp).unwrap();
        assert_eq!(store.load().unwrap(), Some(cp.clone()));

        let mut next = cp;
        next.last_completed = Some(ActionId(4));
        store.save(&next).unwrap();
        assert_eq!(store.load().unwrap().unwrap().last_completed, Some(ActionId(4)));
    }

    #[test]
    fn file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            FileCheckpointStore::new(path).load(),
            Err(CheckpointError::Encoding(_))
        ));
    }

    #[test]
    fn memory_store_is_shared_and_can_fail() {
        let store = MemoryCheckpointStore::failing_after(1);
        let view = store.clone();
        store.save(&sample()).unwrap();
        assert_eq!(view.saves(), 1);
        assert!(store.save(&sample()).is_err());
        assert!(view.latest().is_some());
    }
}
