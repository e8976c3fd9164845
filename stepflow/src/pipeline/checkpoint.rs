//! Round-boundary checkpoints for crash-consistent resumption.
//!
//! The scheduler records the finalized outcomes after every round. A run
//! started again with the same workflow id picks up from the last recorded
//! round instead of re-executing finished steps.

use crate::core::{RunIdentity, StepOutcome};
use crate::errors::CheckpointError;
use crate::execution::safe_name;
use crate::utils::iso_timestamp;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Where a checkpointed run stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Rounds remain.
    InProgress,
    /// Every step reached a terminal state.
    Completed,
    /// A non-tolerated failure or a deadlock stopped the run.
    Halted {
        /// The halt error text.
        reason: String,
    },
}

/// Durable state of one run at a round boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Namespace scoping the workflow id.
    pub namespace: String,
    /// Queue the run was submitted to.
    pub task_queue: String,
    /// The run.
    pub identity: RunIdentity,
    /// Number of completed rounds.
    pub round: u32,
    /// Run status.
    pub status: CheckpointStatus,
    /// Finalized outcomes, in plan order.
    pub outcomes: Vec<StepOutcome>,
    /// When the checkpoint was written.
    pub updated_at: String,
}

impl Checkpoint {
    /// Creates an empty in-progress checkpoint.
    #[must_use]
    pub fn new(namespace: impl Into<String>, task_queue: impl Into<String>, identity: RunIdentity) -> Self {
        Self {
            namespace: namespace.into(),
            task_queue: task_queue.into(),
            identity,
            round: 0,
            status: CheckpointStatus::InProgress,
            outcomes: Vec::new(),
            updated_at: iso_timestamp(),
        }
    }

    /// Outcomes keyed by step id.
    #[must_use]
    pub fn outcome_map(&self) -> HashMap<String, StepOutcome> {
        self.outcomes
            .iter()
            .map(|o| (o.id.clone(), o.clone()))
            .collect()
    }
}

/// Persists checkpoints keyed by namespace and workflow id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the latest checkpoint of a workflow, if any.
    async fn load(&self, namespace: &str, workflow_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Replaces the checkpoint of `checkpoint.identity.workflow_id`.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

/// Keeps checkpoints in memory; survives scheduler restarts within a process.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    entries: Mutex<HashMap<(String, String), Checkpoint>>,
}

impl InMemoryCheckpointStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored checkpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, namespace: &str, workflow_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self
            .entries
            .lock()
            .get(&(namespace.to_string(), workflow_id.to_string()))
            .cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.entries.lock().insert(
            (checkpoint.namespace.clone(), checkpoint.identity.workflow_id.clone()),
            checkpoint.clone(),
        );
        Ok(())
    }
}

/// One JSON file per workflow under `<root>/<namespace>/`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous checkpoint intact.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Creates a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the checkpoint of a workflow.
    #[must_use]
    pub fn path_for(&self, namespace: &str, workflow_id: &str) -> PathBuf {
        self.root
            .join(safe_name(namespace))
            .join(format!("{}.json", safe_name(workflow_id)))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, namespace: &str, workflow_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(namespace, workflow_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&path)(err)),
        }
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(&checkpoint.namespace, &checkpoint.identity.workflow_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error(parent))?;
        }
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_error(&path))?;
        Ok(())
    }
}
