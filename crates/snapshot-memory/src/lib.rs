//! In-memory checkpoint storage implementation

use parking_lot::RwLock;
use proven_snapshot::{CheckpointMetadata, CheckpointStore, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory checkpoint store for testing
pub struct MemoryCheckpointStore {
    // owner -> checkpoints, oldest first
    checkpoints: Arc<RwLock<HashMap<String, Vec<(CheckpointMetadata, Vec<u8>)>>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            checkpoints: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save_checkpoint(
        &self,
        owner: &str,
        generation: u64,
        data: Vec<u8>,
    ) -> Result<CheckpointMetadata> {
        let meta = CheckpointMetadata::describe(owner, generation, &data);

        let mut checkpoints = self.checkpoints.write();
        let entries = checkpoints.entry(owner.to_string()).or_default();
        entries.retain(|(m, _)| m.generation != generation);
        entries.push((meta.clone(), data));
        entries.sort_by_key(|(m, _)| m.generation);

        Ok(meta)
    }

    fn latest_checkpoint(&self, owner: &str) -> Result<Option<(CheckpointMetadata, Vec<u8>)>> {
        Ok(self
            .checkpoints
            .read()
            .get(owner)
            .and_then(|entries| entries.last().cloned()))
    }

    fn list_checkpoints(&self, owner: &str) -> Result<Vec<CheckpointMetadata>> {
        Ok(self
            .checkpoints
            .read()
            .get(owner)
            .map(|entries| entries.iter().rev().map(|(m, _)| m.clone()).collect())
            .unwrap_or_default())
    }

    fn cleanup_old_checkpoints(&self, owner: &str, keep_count: usize) -> Result<()> {
        if let Some(entries) = self.checkpoints.write().get_mut(owner) {
            let excess = entries.len().saturating_sub(keep_count);
            entries.drain(..excess);
        }
        Ok(())
    }
}
