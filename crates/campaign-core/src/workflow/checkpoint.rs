//! Checkpoint stores for workflow state
//!
//! The graph saves the full `WorkflowState` after every stage so a run can
//! be resumed after a restart.

use super::state::{WorkflowId, WorkflowState};
use crate::error::{CampaignError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, state: &WorkflowState) -> Result<()>;

    async fn load(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowState>>;

    async fn list(&self) -> Result<Vec<WorkflowId>>;
}

/// One JSON file per workflow under a root directory
pub struct FileCheckpointStore {
    root_path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root_path)?;
        Ok(Self { root_path })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    fn checkpoint_path(&self, workflow_id: &WorkflowId) -> PathBuf {
        self.root_path.join(format!("workflow_{}.json", workflow_id))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    /// Written to a temp file then renamed, so readers never see a partial file
    async fn save(&self, state: &WorkflowState) -> Result<()> {
        let json = serde_json::to_string_pretty(state).map_err(|e| {
            CampaignError::Serialization(format!("Failed to serialize workflow state: {}", e))
        })?;

        let path = self.checkpoint_path(&state.workflow_id);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        log::debug!(
            "Checkpointed workflow {} at {} ({:.0}%)",
            state.workflow_id,
            state.current_step,
            state.progress * 100.0
        );
        Ok(())
    }

    async fn load(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowState>> {
        let path = self.checkpoint_path(workflow_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }

        let json = tokio::fs::read_to_string(&path).await?;
        let state = serde_json::from_str(&json).map_err(|e| {
            CampaignError::Checkpoint(format!("Corrupt checkpoint for {}: {}", workflow_id, e))
        })?;
        Ok(Some(state))
    }

    async fn list(&self) -> Result<Vec<WorkflowId>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(id) = stem.strip_prefix("workflow_") {
                match WorkflowId::from_string(id) {
                    Ok(id) => ids.push(id),
                    Err(e) => log::warn!("Ignoring checkpoint file {:?}: {}", path, e),
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// In-memory store that also keeps every snapshot ever saved, in order
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    latest: Mutex<HashMap<WorkflowId, WorkflowState>>,
    history: Mutex<Vec<WorkflowState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every snapshot saved for `workflow_id`, oldest first
    pub fn snapshots(&self, workflow_id: &WorkflowId) -> Vec<WorkflowState> {
        self.history
            .lock()
            .map(|history| {
                history
                    .iter()
                    .filter(|s| &s.workflow_id == workflow_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn poisoned(e: impl std::fmt::Display) -> CampaignError {
        CampaignError::Checkpoint(format!("Checkpoint store lock poisoned: {}", e))
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, state: &WorkflowState) -> Result<()> {
        self.latest
            .lock()
            .map_err(Self::poisoned)?
            .insert(state.workflow_id.clone(), state.clone());
        self.history
            .lock()
            .map_err(Self::poisoned)?
            .push(state.clone());
        Ok(())
    }

    async fn load(&self, workflow_id: &WorkflowId) -> Result<Option<WorkflowState>> {
        Ok(self
            .latest
            .lock()
            .map_err(Self::poisoned)?
            .get(workflow_id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<WorkflowId>> {
        let mut ids: Vec<WorkflowId> = self
            .latest
            .lock()
            .map_err(Self::poisoned)?
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}
