//! Persistent task status records, one JSON object per task and chip.

use serde::{Deserialize, Serialize};

use crate::catalog::ChipRef;
use crate::error::{StorageError, StorageResult};
use crate::paths::{dataset_name, status_key};
use crate::storage::{ObjectStore, WritePrecondition};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    Running,
    Success,
    Failure {
        message: String,
    },
}

impl TaskStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }
}

/// Identifies one status record: task name, prefix, exposure, version, chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskKey {
    pub task: String,
    pub prefix: String,
    pub chip: ChipRef,
    pub version: String,
}

impl TaskKey {
    pub fn new(task: &str, prefix: &str, chip: ChipRef, version: &str) -> Self {
        Self {
            task: task.to_string(),
            prefix: prefix.to_string(),
            chip,
            version: version.to_string(),
        }
    }

    /// The same chip under another task name.
    pub fn for_task(&self, task: &str) -> Self {
        Self {
            task: task.to_string(),
            ..self.clone()
        }
    }

    pub fn dataset_name(&self) -> String {
        dataset_name(&self.prefix, self.chip, &self.version)
    }

    fn object_key(&self) -> String {
        status_key(&self.task, &self.prefix, self.chip, &self.version)
    }
}

pub struct StatusStore<S> {
    store: S,
}

impl<S: ObjectStore> StatusStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// A task with no record has not started.
    pub fn get(&self, key: &TaskKey) -> StorageResult<TaskStatus> {
        let object_key = key.object_key();
        match self.store.get(&object_key) {
            Ok(object) => serde_json::from_slice(&object.data)
                .map_err(|e| StorageError::corrupt(&object_key, e.to_string())),
            Err(e) if e.is_not_found() => Ok(TaskStatus::NotStarted),
            Err(e) => Err(e),
        }
    }

    pub fn set(&self, key: &TaskKey, status: &TaskStatus) -> StorageResult<()> {
        let object_key = key.object_key();
        let bytes =
            serde_json::to_vec(status).map_err(|e| StorageError::corrupt(&object_key, e.to_string()))?;
        self.store.put(&object_key, &bytes, WritePrecondition::None)?;
        Ok(())
    }
}
